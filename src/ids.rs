//! Identifier generation for definitions, runs and tasks.

use chrono::Utc;
use uuid::Uuid;

/// Generates `<prefix>_<base36 millis>_<8 hex chars>`.
pub fn generate_id(prefix: &str) -> String {
    let millis = Utc::now().timestamp_millis().max(0) as u64;
    let random = Uuid::new_v4().simple().to_string();
    format!("{}_{}_{}", prefix, to_base36(millis), &random[..8])
}

fn to_base36(mut value: u64) -> String {
    const DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if value == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while value > 0 {
        out.push(DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base36() {
        assert_eq!(to_base36(0), "0");
        assert_eq!(to_base36(35), "z");
        assert_eq!(to_base36(36), "10");
    }

    #[test]
    fn test_generate_id_shape() {
        let id = generate_id("task");
        let parts: Vec<&str> = id.split('_').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "task");
        assert_eq!(parts[2].len(), 8);
    }
}
