//! 推广佣金计算

use rand::Rng;

const CODE_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const CODE_LEN: usize = 8;

/// 随机大写字母数字串
pub(crate) fn random_alnum(len: usize) -> String {
    let mut rng = rand::rng();
    (0..len)
        .map(|_| CODE_CHARSET[rng.random_range(0..CODE_CHARSET.len())] as char)
        .collect()
}

/// 生成 8 位大写字母数字推广码
pub fn generate_affiliate_code() -> String {
    random_alnum(CODE_LEN)
}

/// 按佣金比例（百分比）计算佣金，四舍五入到分
pub fn commission_amount_cents(sale_amount_cents: i64, rate_percent: f64) -> i64 {
    (sale_amount_cents as f64 * rate_percent / 100.0).round() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_code_format() {
        for _ in 0..20 {
            let code = generate_affiliate_code();
            assert_eq!(code.len(), 8);
            assert!(code.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));
        }
    }

    #[test]
    fn test_commission_amount() {
        assert_eq!(commission_amount_cents(10_000, 10.0), 1_000);
        assert_eq!(commission_amount_cents(4_999, 12.5), 625);
        assert_eq!(commission_amount_cents(1, 50.0), 1);
        assert_eq!(commission_amount_cents(0, 30.0), 0);
        assert_eq!(commission_amount_cents(19_900, 100.0), 19_900);
    }
}
