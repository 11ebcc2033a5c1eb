use chrono::Utc;
use rand::Rng;

use crate::domain::order::OrderIdentifiers;

// ============================================================================
// Human-facing identifiers
// ============================================================================
//
// Order numbers are `DJ-` + base-36 milliseconds since 2024-01-01 + a random
// base-36 suffix. That keeps them short, roughly time-sortable and unlikely
// to collide, but only the repository's unique constraint guarantees
// uniqueness. Callers retry with a fresh number on collision.
//
// ============================================================================

pub const ORDER_NUMBER_PREFIX: &str = "DJ-";
pub const ORDER_NUMBER_MIN_LEN: usize = 9;
pub const ORDER_NUMBER_MAX_LEN: usize = 13;
pub const DELIVERY_CODE_LEN: usize = 5;

/// Custom epoch: 2024-01-01 00:00:00 UTC
const EPOCH_MS: i64 = 1_704_067_200_000;
const RANDOM_SUFFIX_LEN: usize = 4;
const BASE36: &[u8; 36] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";

pub trait IdentifierGenerator: Send + Sync {
    fn generate_order_number(&self) -> String;

    fn generate_delivery_code(&self) -> String;

    fn generate(&self) -> OrderIdentifiers {
        OrderIdentifiers {
            order_number: self.generate_order_number(),
            delivery_code: self.generate_delivery_code(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RandomIdentifierGenerator;

impl IdentifierGenerator for RandomIdentifierGenerator {
    fn generate_order_number(&self) -> String {
        let elapsed = (Utc::now().timestamp_millis() - EPOCH_MS).max(0) as u64;
        let mut body = to_base36(elapsed);

        let mut rng = rand::thread_rng();
        for _ in 0..RANDOM_SUFFIX_LEN {
            body.push(BASE36[rng.gen_range(0..BASE36.len())] as char);
        }

        // Pad early timestamps so the body is never shorter than allowed.
        while body.len() < ORDER_NUMBER_MIN_LEN {
            body.insert(0, '0');
        }

        let overflow = body.len().saturating_sub(ORDER_NUMBER_MAX_LEN);
        format!("{ORDER_NUMBER_PREFIX}{}", &body[overflow..])
    }

    fn generate_delivery_code(&self) -> String {
        let code: u32 = rand::thread_rng().gen_range(0..100_000);
        format!("{code:05}")
    }
}

fn to_base36(mut value: u64) -> String {
    if value == 0 {
        return "0".to_string();
    }

    let mut digits = Vec::new();
    while value > 0 {
        digits.push(BASE36[(value % 36) as usize]);
        value /= 36;
    }
    digits.reverse();
    String::from_utf8(digits).unwrap_or_default()
}

/// Canonical form used for storage and lookups.
pub fn normalize_order_number(raw: &str) -> String {
    raw.trim().to_ascii_uppercase()
}

pub fn is_valid_order_number(raw: &str) -> bool {
    let normalized = normalize_order_number(raw);
    let Some(body) = normalized.strip_prefix(ORDER_NUMBER_PREFIX) else {
        return false;
    };

    (ORDER_NUMBER_MIN_LEN..=ORDER_NUMBER_MAX_LEN).contains(&body.len())
        && body.bytes().all(|b| b.is_ascii_alphanumeric())
}

pub fn is_valid_delivery_code(code: &str) -> bool {
    code.len() == DELIVERY_CODE_LEN && code.bytes().all(|b| b.is_ascii_digit())
}
