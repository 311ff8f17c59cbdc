use regex::Regex;
use std::sync::LazyLock;

static PAN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z]{5}[0-9]{4}[A-Z]$").expect("PAN pattern is valid"));

static BROKER_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^E[A-Za-z0-9]{6}$").expect("broker code pattern is valid"));

/// Five uppercase letters, four digits, one uppercase letter.
pub fn is_valid_pan(value: &str) -> bool {
    PAN.is_match(value)
}

/// "E" followed by six alphanumerics.
pub fn is_valid_broker_code(value: &str) -> bool {
    BROKER_CODE.is_match(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pan_shape() {
        assert!(is_valid_pan("ABCDE1234F"));
        assert!(!is_valid_pan("ABCD1234F"));
        assert!(!is_valid_pan("abcde1234f"));
        assert!(!is_valid_pan("ABCDE12345"));
        assert!(!is_valid_pan("ABCDE1234FG"));
        assert!(!is_valid_pan(""));
    }

    #[test]
    fn broker_code_shape() {
        assert!(is_valid_broker_code("E123456"));
        assert!(is_valid_broker_code("EAb12Z9"));
        assert!(!is_valid_broker_code("X123456"));
        assert!(!is_valid_broker_code("E12345"));
        assert!(!is_valid_broker_code("E1234567"));
        assert!(!is_valid_broker_code("E12-456"));
    }
}
