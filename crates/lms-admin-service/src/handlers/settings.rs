//! 平台设置 API 处理器
//!
//! 邮件、媒体、支付、视频、短信、SEO 六组设置，每组作为一个 JSON 文档存储在
//! `platform_settings` 表。读取时对密钥脱敏，提交脱敏值或空串表示保留原密钥。

use std::time::Duration;

use axum::{Json, extract::State};
use lms_shared::observability::metrics::record_mutation;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use sqlx::PgPool;
use tracing::info;
use validator::{Validate, ValidationError};

use crate::{dto::ApiResponse, error::AdminError, extract::Operator, state::AppState};

/// 密钥脱敏后的显示值
pub const SECRET_MASK: &str = "********";
const SETTINGS_CACHE_TTL: Duration = Duration::from_secs(600);

/// 一组平台设置
pub trait SettingsGroup:
    Serialize + DeserializeOwned + Default + Validate + Send + Sync + 'static
{
    /// 存储键
    const KEY: &'static str;
    /// 提示文案中的分组名
    const LABEL: &'static str;

    /// 将密钥替换为脱敏值
    fn mask_secrets(&mut self) {}

    /// 未修改的密钥沿用已保存的值
    fn keep_secrets_from(&mut self, _stored: &Self) {}
}

fn mask(secret: &mut String) {
    if !secret.is_empty() {
        *secret = SECRET_MASK.to_string();
    }
}

fn keep(incoming: &mut String, stored: &str) {
    if incoming.is_empty() || incoming == SECRET_MASK {
        *incoming = stored.to_string();
    }
}

fn cache_key<T: SettingsGroup>() -> String {
    format!("settings:{}", T::KEY)
}

fn one_of(value: &str, allowed: &[&str], field: &'static str) -> Result<(), ValidationError> {
    if allowed.contains(&value) {
        Ok(())
    } else {
        Err(ValidationError::new(field)
            .with_message(format!("不支持的取值，可选: {}", allowed.join(", ")).into()))
    }
}

// ---------------------------------------------------------------------------
// 设置分组
// ---------------------------------------------------------------------------

fn validate_email_provider(value: &str) -> Result<(), ValidationError> {
    one_of(value, &["smtp", "sendgrid", "ses", "mailgun"], "provider")
}

/// 邮件设置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase", default)]
pub struct EmailSettings {
    #[validate(custom(function = "validate_email_provider"))]
    pub provider: String,
    #[validate(length(min = 1, max = 255, message = "SMTP 主机不能为空"))]
    pub smtp_host: String,
    #[validate(range(min = 1, max = 65535, message = "端口必须在1-65535之间"))]
    pub smtp_port: u32,
    pub smtp_username: String,
    pub smtp_password: String,
    pub use_tls: bool,
    #[validate(email(message = "发件地址格式不正确"))]
    pub from_address: String,
    #[validate(length(min = 1, max = 100, message = "发件人名称长度必须在1-100个字符之间"))]
    pub from_name: String,
    #[validate(email(message = "回复地址格式不正确"))]
    pub reply_to: Option<String>,
}

impl Default for EmailSettings {
    fn default() -> Self {
        Self {
            provider: "smtp".to_string(),
            smtp_host: "localhost".to_string(),
            smtp_port: 587,
            smtp_username: String::new(),
            smtp_password: String::new(),
            use_tls: true,
            from_address: "no-reply@example.com".to_string(),
            from_name: "LMS".to_string(),
            reply_to: None,
        }
    }
}

impl SettingsGroup for EmailSettings {
    const KEY: &'static str = "email";
    const LABEL: &'static str = "邮件";

    fn mask_secrets(&mut self) {
        mask(&mut self.smtp_password);
    }

    fn keep_secrets_from(&mut self, stored: &Self) {
        keep(&mut self.smtp_password, &stored.smtp_password);
    }
}

fn validate_storage_provider(value: &str) -> Result<(), ValidationError> {
    one_of(value, &["local", "s3", "oss", "gcs"], "storage_provider")
}

/// 媒体设置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase", default)]
pub struct MediaSettings {
    #[validate(custom(function = "validate_storage_provider"))]
    pub storage_provider: String,
    #[validate(range(min = 1, max = 2048, message = "上传大小上限必须在1-2048MB之间"))]
    pub max_upload_size_mb: u32,
    #[validate(length(min = 1, message = "至少允许一种图片格式"))]
    pub allowed_image_types: Vec<String>,
    pub allowed_document_types: Vec<String>,
    #[validate(range(min = 1, max = 100, message = "图片质量必须在1-100之间"))]
    pub image_quality: u32,
    #[validate(url(message = "CDN 地址必须是有效的URL"))]
    pub cdn_base_url: Option<String>,
}

impl Default for MediaSettings {
    fn default() -> Self {
        Self {
            storage_provider: "local".to_string(),
            max_upload_size_mb: 50,
            allowed_image_types: vec!["jpg".into(), "jpeg".into(), "png".into(), "webp".into()],
            allowed_document_types: vec!["pdf".into(), "docx".into(), "pptx".into()],
            image_quality: 85,
            cdn_base_url: None,
        }
    }
}

impl SettingsGroup for MediaSettings {
    const KEY: &'static str = "media";
    const LABEL: &'static str = "媒体";
}

fn validate_payment_provider(value: &str) -> Result<(), ValidationError> {
    one_of(value, &["stripe", "paypal", "alipay", "wechat_pay"], "provider")
}

fn validate_currency(value: &str) -> Result<(), ValidationError> {
    if value.len() == 3 && value.chars().all(|c| c.is_ascii_uppercase()) {
        Ok(())
    } else {
        Err(ValidationError::new("currency").with_message("币种必须是三位大写字母".into()))
    }
}

/// 支付设置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase", default)]
pub struct PaymentSettings {
    pub enabled: bool,
    #[validate(custom(function = "validate_payment_provider"))]
    pub provider: String,
    #[validate(custom(function = "validate_currency"))]
    pub currency: String,
    pub publishable_key: String,
    pub secret_key: String,
    pub webhook_secret: String,
    pub sandbox_mode: bool,
}

impl Default for PaymentSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            provider: "stripe".to_string(),
            currency: "USD".to_string(),
            publishable_key: String::new(),
            secret_key: String::new(),
            webhook_secret: String::new(),
            sandbox_mode: true,
        }
    }
}

impl SettingsGroup for PaymentSettings {
    const KEY: &'static str = "payment";
    const LABEL: &'static str = "支付";

    fn mask_secrets(&mut self) {
        mask(&mut self.secret_key);
        mask(&mut self.webhook_secret);
    }

    fn keep_secrets_from(&mut self, stored: &Self) {
        keep(&mut self.secret_key, &stored.secret_key);
        keep(&mut self.webhook_secret, &stored.webhook_secret);
    }
}

fn validate_video_provider(value: &str) -> Result<(), ValidationError> {
    one_of(value, &["local", "vimeo", "youtube", "bunny"], "provider")
}

fn validate_video_quality(value: &str) -> Result<(), ValidationError> {
    one_of(value, &["360p", "480p", "720p", "1080p"], "default_quality")
}

/// 视频设置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase", default)]
pub struct VideoSettings {
    #[validate(custom(function = "validate_video_provider"))]
    pub provider: String,
    #[validate(range(min = 1, max = 10240, message = "视频大小上限必须在1-10240MB之间"))]
    pub max_video_size_mb: u32,
    #[validate(length(min = 1, message = "至少允许一种视频格式"))]
    pub allowed_formats: Vec<String>,
    #[validate(custom(function = "validate_video_quality"))]
    pub default_quality: String,
    pub enable_download: bool,
    pub autoplay: bool,
}

impl Default for VideoSettings {
    fn default() -> Self {
        Self {
            provider: "local".to_string(),
            max_video_size_mb: 2048,
            allowed_formats: vec!["mp4".into(), "webm".into()],
            default_quality: "720p".to_string(),
            enable_download: false,
            autoplay: false,
        }
    }
}

impl SettingsGroup for VideoSettings {
    const KEY: &'static str = "video";
    const LABEL: &'static str = "视频";
}

fn validate_sms_provider(value: &str) -> Result<(), ValidationError> {
    one_of(value, &["twilio", "aliyun", "tencent", "vonage"], "provider")
}

/// 短信设置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase", default)]
pub struct SmsSettings {
    pub enabled: bool,
    #[validate(custom(function = "validate_sms_provider"))]
    pub provider: String,
    pub account_id: String,
    pub api_key: String,
    #[validate(length(max = 20, message = "发送方标识不能超过20个字符"))]
    pub sender_id: String,
}

impl Default for SmsSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            provider: "twilio".to_string(),
            account_id: String::new(),
            api_key: String::new(),
            sender_id: String::new(),
        }
    }
}

impl SettingsGroup for SmsSettings {
    const KEY: &'static str = "sms";
    const LABEL: &'static str = "短信";

    fn mask_secrets(&mut self) {
        mask(&mut self.api_key);
    }

    fn keep_secrets_from(&mut self, stored: &Self) {
        keep(&mut self.api_key, &stored.api_key);
    }
}

/// SEO 设置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase", default)]
pub struct SeoSettings {
    #[validate(length(min = 1, max = 70, message = "站点标题长度必须在1-70个字符之间"))]
    pub site_title: String,
    #[validate(length(max = 160, message = "描述不能超过160个字符"))]
    pub meta_description: String,
    pub meta_keywords: Vec<String>,
    #[validate(url(message = "分享图片地址必须是有效的URL"))]
    pub og_image_url: Option<String>,
    #[validate(url(message = "规范地址必须是有效的URL"))]
    pub canonical_url: Option<String>,
    pub google_analytics_id: Option<String>,
    #[validate(length(max = 5000, message = "robots.txt 不能超过5000个字符"))]
    pub robots_txt: String,
}

impl Default for SeoSettings {
    fn default() -> Self {
        Self {
            site_title: "LMS".to_string(),
            meta_description: String::new(),
            meta_keywords: Vec::new(),
            og_image_url: None,
            canonical_url: None,
            google_analytics_id: None,
            robots_txt: "User-agent: *\nAllow: /\n".to_string(),
        }
    }
}

impl SettingsGroup for SeoSettings {
    const KEY: &'static str = "seo";
    const LABEL: &'static str = "SEO";
}

// ---------------------------------------------------------------------------
// 读写
// ---------------------------------------------------------------------------

/// 读取已保存的设置（含明文密钥），未保存时返回默认值
async fn load_settings<T: SettingsGroup>(pool: &PgPool) -> Result<T, AdminError> {
    let value: Option<serde_json::Value> =
        sqlx::query_scalar("SELECT value FROM platform_settings WHERE group_key = $1")
            .bind(T::KEY)
            .fetch_optional(pool)
            .await?;

    match value {
        Some(v) => Ok(serde_json::from_value(v)?),
        None => Ok(T::default()),
    }
}

/// 获取一组设置
///
/// GET /admin/settings/{group}
pub async fn get_settings<T: SettingsGroup>(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<T>>, AdminError> {
    let key = cache_key::<T>();
    if let Some(cached) = state.cache_get::<T>(&key).await {
        return Ok(Json(ApiResponse::success(cached)));
    }

    let mut settings = load_settings::<T>(&state.pool).await?;
    settings.mask_secrets();
    state.cache_set(&key, &settings, SETTINGS_CACHE_TTL).await;

    Ok(Json(ApiResponse::success(settings)))
}

/// 保存一组设置
///
/// PUT /admin/settings/{group}
pub async fn update_settings<T: SettingsGroup>(
    State(state): State<AppState>,
    operator: Operator,
    Json(mut req): Json<T>,
) -> Result<Json<ApiResponse<T>>, AdminError> {
    req.validate()?;

    let stored = load_settings::<T>(&state.pool).await?;
    req.keep_secrets_from(&stored);

    let value = serde_json::to_value(&req)?;
    sqlx::query(
        r#"
        INSERT INTO platform_settings (group_key, value, updated_by, updated_at)
        VALUES ($1, $2, $3, NOW())
        ON CONFLICT (group_key)
        DO UPDATE SET value = EXCLUDED.value, updated_by = EXCLUDED.updated_by, updated_at = NOW()
        "#,
    )
    .bind(T::KEY)
    .bind(&value)
    .bind(operator.as_str())
    .execute(&state.pool)
    .await?;

    state.cache_invalidate(&cache_key::<T>()).await;

    record_mutation("settings", T::KEY);
    info!(group = T::KEY, operator = operator.as_str(), "Settings updated");

    req.mask_secrets();
    Ok(Json(ApiResponse::success_with_message(
        req,
        format!("{}设置已保存", T::LABEL),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(EmailSettings::default().validate().is_ok());
        assert!(MediaSettings::default().validate().is_ok());
        assert!(PaymentSettings::default().validate().is_ok());
        assert!(VideoSettings::default().validate().is_ok());
        assert!(SmsSettings::default().validate().is_ok());
        assert!(SeoSettings::default().validate().is_ok());
    }

    #[test]
    fn test_mask_secrets() {
        let mut email = EmailSettings {
            smtp_password: "hunter2".to_string(),
            ..Default::default()
        };
        email.mask_secrets();
        assert_eq!(email.smtp_password, SECRET_MASK);

        // 未设置的密钥保持为空，便于前端区分
        let mut sms = SmsSettings::default();
        sms.mask_secrets();
        assert_eq!(sms.api_key, "");
    }

    #[test]
    fn test_keep_secrets_on_mask_or_empty() {
        let stored = PaymentSettings {
            secret_key: "sk_live_123".to_string(),
            webhook_secret: "whsec_456".to_string(),
            ..Default::default()
        };

        let mut incoming = PaymentSettings {
            secret_key: SECRET_MASK.to_string(),
            webhook_secret: String::new(),
            ..Default::default()
        };
        incoming.keep_secrets_from(&stored);
        assert_eq!(incoming.secret_key, "sk_live_123");
        assert_eq!(incoming.webhook_secret, "whsec_456");

        let mut rotated = PaymentSettings {
            secret_key: "sk_live_new".to_string(),
            ..Default::default()
        };
        rotated.keep_secrets_from(&stored);
        assert_eq!(rotated.secret_key, "sk_live_new");
    }

    #[test]
    fn test_email_validation() {
        let invalid = EmailSettings {
            smtp_port: 0,
            from_address: "not-an-email".to_string(),
            provider: "pigeon".to_string(),
            ..Default::default()
        };
        let errors = invalid.validate().unwrap_err();
        let fields = errors.field_errors();
        assert!(fields.contains_key("smtp_port"));
        assert!(fields.contains_key("from_address"));
        assert!(fields.contains_key("provider"));
    }

    #[test]
    fn test_payment_currency_validation() {
        let invalid = PaymentSettings {
            currency: "usd".to_string(),
            ..Default::default()
        };
        assert!(invalid.validate().is_err());
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let video: VideoSettings = serde_json::from_str(r#"{"defaultQuality":"1080p"}"#).unwrap();
        assert_eq!(video.default_quality, "1080p");
        assert_eq!(video.max_video_size_mb, 2048);
        assert!(video.validate().is_ok());

        let bad: VideoSettings = serde_json::from_str(r#"{"defaultQuality":"4k"}"#).unwrap();
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_cache_keys() {
        assert_eq!(cache_key::<SeoSettings>(), "settings:seo");
        assert_eq!(cache_key::<SmsSettings>(), "settings:sms");
    }
}
