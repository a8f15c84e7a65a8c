//! 国家/地区访问规则判定
//!
//! 输入为作用域内（全站 + 指定课程）已启用的规则

use serde::Serialize;

use super::RestrictionType;

/// 参与判定的规则
#[derive(Debug, Clone)]
pub struct AccessRule {
    pub country_code: String,
    pub restriction_type: RestrictionType,
    pub course_id: Option<i64>,
    pub reason: Option<String>,
}

/// 判定结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessDecision {
    pub allowed: bool,
    pub reason: Option<String>,
}

/// 判定国家是否允许访问
///
/// 命中任一黑名单即拒绝；作用域内存在白名单且未命中时拒绝；其余放行
pub fn evaluate_access(country_code: &str, rules: &[AccessRule]) -> AccessDecision {
    let matches = |rule: &&AccessRule| rule.country_code.eq_ignore_ascii_case(country_code);

    if let Some(block) = rules
        .iter()
        .filter(|r| r.restriction_type == RestrictionType::Block)
        .find(matches)
    {
        let scope = if block.course_id.is_some() { "该课程" } else { "平台" };
        return AccessDecision {
            allowed: false,
            reason: Some(
                block
                    .reason
                    .clone()
                    .unwrap_or_else(|| format!("{}不向该国家/地区开放", scope)),
            ),
        };
    }

    let mut allow_rules = rules
        .iter()
        .filter(|r| r.restriction_type == RestrictionType::Allow)
        .peekable();
    if allow_rules.peek().is_some() && !allow_rules.any(|r| matches(&r)) {
        return AccessDecision {
            allowed: false,
            reason: Some("仅对指定国家/地区开放".to_string()),
        };
    }

    AccessDecision {
        allowed: true,
        reason: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(code: &str, restriction_type: RestrictionType, course_id: Option<i64>) -> AccessRule {
        AccessRule {
            country_code: code.to_string(),
            restriction_type,
            course_id,
            reason: None,
        }
    }

    #[test]
    fn test_no_rules_allows() {
        assert!(evaluate_access("US", &[]).allowed);
    }

    #[test]
    fn test_block_rule_denies() {
        let rules = vec![rule("KP", RestrictionType::Block, None)];
        let decision = evaluate_access("kp", &rules);
        assert!(!decision.allowed);
        assert!(decision.reason.is_some());
        assert!(evaluate_access("US", &rules).allowed);
    }

    #[test]
    fn test_block_reason_is_reported() {
        let mut blocked = rule("IR", RestrictionType::Block, Some(3));
        blocked.reason = Some("版权限制".to_string());
        let decision = evaluate_access("IR", &[blocked]);
        assert_eq!(decision.reason.as_deref(), Some("版权限制"));
    }

    #[test]
    fn test_allow_list_denies_others() {
        let rules = vec![
            rule("CN", RestrictionType::Allow, Some(7)),
            rule("SG", RestrictionType::Allow, Some(7)),
        ];
        assert!(evaluate_access("CN", &rules).allowed);
        assert!(evaluate_access("SG", &rules).allowed);
        assert!(!evaluate_access("US", &rules).allowed);
    }

    #[test]
    fn test_block_wins_over_allow() {
        let rules = vec![
            rule("CN", RestrictionType::Allow, Some(7)),
            rule("CN", RestrictionType::Block, None),
        ];
        assert!(!evaluate_access("CN", &rules).allowed);
    }
}
