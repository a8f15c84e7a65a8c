//! 路由配置模块
//!
//! 定义所有 REST API 端点的路由映射，统一挂载在 `/admin` 下

use axum::{
    Json, Router, middleware,
    routing::{delete, get, post, put},
};

use crate::{
    handlers::{
        self,
        settings::{
            EmailSettings, MediaSettings, PaymentSettings, SeoSettings, SmsSettings, VideoSettings,
        },
    },
    middleware::{antiforgery_middleware, issue_token},
    state::AppState,
};

/// 构建成就与徽章路由
fn gamification_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/achievements",
            get(handlers::achievement::list_achievements)
                .post(handlers::achievement::create_achievement),
        )
        .route(
            "/achievements/{id}",
            get(handlers::achievement::get_achievement)
                .put(handlers::achievement::update_achievement)
                .delete(handlers::achievement::delete_achievement),
        )
        .route(
            "/achievements/{id}/toggle-active",
            post(handlers::achievement::toggle_achievement_active),
        )
        .route(
            "/badges",
            get(handlers::badge::list_badges).post(handlers::badge::create_badge),
        )
        .route(
            "/badges/{id}",
            get(handlers::badge::get_badge)
                .put(handlers::badge::update_badge)
                .delete(handlers::badge::delete_badge),
        )
        .route(
            "/badges/{id}/toggle-active",
            post(handlers::badge::toggle_badge_active),
        )
}

/// 构建推广员与佣金路由
///
/// `/affiliates/commissions` 是静态段，优先于 `/affiliates/{id}` 匹配
fn affiliate_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/affiliates",
            get(handlers::affiliate::list_affiliates).post(handlers::affiliate::create_affiliate),
        )
        .route(
            "/affiliates/commissions",
            get(handlers::affiliate::list_commissions)
                .post(handlers::affiliate::create_commission),
        )
        .route(
            "/affiliates/commissions/stats",
            get(handlers::affiliate::commission_stats),
        )
        .route(
            "/affiliates/commissions/{id}/approve",
            post(handlers::affiliate::approve_commission),
        )
        .route(
            "/affiliates/commissions/{id}/reject",
            post(handlers::affiliate::reject_commission),
        )
        .route(
            "/affiliates/commissions/{id}/mark-paid",
            post(handlers::affiliate::mark_commission_paid),
        )
        .route(
            "/affiliates/{id}",
            get(handlers::affiliate::get_affiliate)
                .put(handlers::affiliate::update_affiliate)
                .delete(handlers::affiliate::delete_affiliate),
        )
        .route(
            "/affiliates/{id}/toggle-active",
            post(handlers::affiliate::toggle_affiliate_active),
        )
}

/// 构建评论审核路由
fn comment_routes() -> Router<AppState> {
    Router::new()
        .route("/comments", get(handlers::comment::list_comments))
        .route("/comments/stats", get(handlers::comment::comment_stats))
        .route("/comments/bulk", post(handlers::comment::bulk_comment_action))
        .route(
            "/comments/{id}",
            delete(handlers::comment::delete_comment),
        )
        .route(
            "/comments/{id}/approve",
            post(handlers::comment::approve_comment),
        )
        .route(
            "/comments/{id}/reject",
            post(handlers::comment::reject_comment),
        )
        .route(
            "/comments/{id}/spam",
            post(handlers::comment::mark_comment_spam),
        )
}

/// 构建国家/地区访问限制路由
fn country_restriction_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/country-restrictions",
            get(handlers::country_restriction::list_country_restrictions)
                .post(handlers::country_restriction::create_country_restriction),
        )
        .route(
            "/country-restrictions/check",
            get(handlers::country_restriction::check_country_access),
        )
        .route(
            "/country-restrictions/{id}",
            get(handlers::country_restriction::get_country_restriction)
                .put(handlers::country_restriction::update_country_restriction)
                .delete(handlers::country_restriction::delete_country_restriction),
        )
        .route(
            "/country-restrictions/{id}/toggle-active",
            post(handlers::country_restriction::toggle_country_restriction_active),
        )
}

/// 构建课程分析与财务报表路由
fn analytics_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/course-analytics/overview",
            get(handlers::course_analytics::get_overview),
        )
        .route(
            "/course-analytics/courses/{course_id}",
            get(handlers::course_analytics::get_course_analytics),
        )
        .route(
            "/course-analytics/top-courses",
            get(handlers::course_analytics::get_top_courses),
        )
        .route(
            "/financial-reports/summary",
            get(handlers::financial_report::revenue_summary),
        )
        .route(
            "/financial-reports/revenue",
            get(handlers::financial_report::revenue_series),
        )
        .route(
            "/financial-reports/by-course",
            get(handlers::financial_report::revenue_by_course),
        )
        .route(
            "/financial-reports/payments",
            get(handlers::financial_report::list_payments),
        )
        .route(
            "/financial-reports/payments/export",
            get(handlers::financial_report::export_payments),
        )
}

/// 构建系统设置与税率路由
fn settings_routes() -> Router<AppState> {
    use handlers::settings::{get_settings, update_settings};

    Router::new()
        .route(
            "/settings/email",
            get(get_settings::<EmailSettings>).put(update_settings::<EmailSettings>),
        )
        .route(
            "/settings/media",
            get(get_settings::<MediaSettings>).put(update_settings::<MediaSettings>),
        )
        .route(
            "/settings/payment",
            get(get_settings::<PaymentSettings>).put(update_settings::<PaymentSettings>),
        )
        .route(
            "/settings/video",
            get(get_settings::<VideoSettings>).put(update_settings::<VideoSettings>),
        )
        .route(
            "/settings/sms",
            get(get_settings::<SmsSettings>).put(update_settings::<SmsSettings>),
        )
        .route(
            "/settings/seo",
            get(get_settings::<SeoSettings>).put(update_settings::<SeoSettings>),
        )
        .route(
            "/tax-settings",
            get(handlers::tax_setting::list_tax_settings)
                .post(handlers::tax_setting::create_tax_setting),
        )
        .route(
            "/tax-settings/{id}",
            get(handlers::tax_setting::get_tax_setting)
                .put(handlers::tax_setting::update_tax_setting)
                .delete(handlers::tax_setting::delete_tax_setting),
        )
        .route(
            "/tax-settings/{id}/set-default",
            post(handlers::tax_setting::set_default_tax_setting),
        )
}

/// 构建选课管理路由
fn enrollment_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/enrollments",
            get(handlers::enrollment::list_enrollments)
                .post(handlers::enrollment::create_enrollment),
        )
        .route(
            "/enrollments/stats",
            get(handlers::enrollment::enrollment_stats),
        )
        .route(
            "/enrollments/export",
            get(handlers::enrollment::export_enrollments),
        )
        .route(
            "/enrollments/{id}",
            get(handlers::enrollment::get_enrollment)
                .delete(handlers::enrollment::delete_enrollment),
        )
        .route(
            "/enrollments/{id}/status",
            put(handlers::enrollment::update_enrollment_status),
        )
        .route(
            "/enrollments/{id}/progress",
            put(handlers::enrollment::update_enrollment_progress),
        )
}

/// 构建运维支持路由
///
/// 包含错误日志、工单、用户会话
fn operations_routes() -> Router<AppState> {
    Router::new()
        .route("/error-logs", get(handlers::error_log::list_error_logs))
        .route("/error-logs/stats", get(handlers::error_log::error_log_stats))
        .route(
            "/error-logs/resolve",
            post(handlers::error_log::bulk_resolve_error_logs),
        )
        .route("/error-logs/clear", post(handlers::error_log::clear_error_logs))
        .route(
            "/error-logs/{id}",
            get(handlers::error_log::get_error_log).delete(handlers::error_log::delete_error_log),
        )
        .route(
            "/error-logs/{id}/resolve",
            post(handlers::error_log::resolve_error_log),
        )
        .route(
            "/support-tickets",
            get(handlers::support_ticket::list_tickets)
                .post(handlers::support_ticket::create_ticket),
        )
        .route(
            "/support-tickets/stats",
            get(handlers::support_ticket::ticket_stats),
        )
        .route(
            "/support-tickets/{id}",
            get(handlers::support_ticket::get_ticket),
        )
        .route(
            "/support-tickets/{id}/replies",
            post(handlers::support_ticket::reply_ticket),
        )
        .route(
            "/support-tickets/{id}/status",
            put(handlers::support_ticket::update_ticket_status),
        )
        .route(
            "/support-tickets/{id}/assign",
            put(handlers::support_ticket::assign_ticket),
        )
        .route(
            "/support-tickets/{id}/priority",
            put(handlers::support_ticket::update_ticket_priority),
        )
        .route("/user-sessions", get(handlers::user_session::list_sessions))
        .route(
            "/user-sessions/stats",
            get(handlers::user_session::session_stats),
        )
        .route(
            "/user-sessions/purge",
            post(handlers::user_session::purge_expired_sessions),
        )
        .route(
            "/user-sessions/users/{user_id}/revoke",
            post(handlers::user_session::revoke_all_for_user),
        )
        .route(
            "/user-sessions/{id}/revoke",
            post(handlers::user_session::revoke_session),
        )
}

/// 构建营销与报表路由
///
/// 包含定时报表、限时特价
fn marketing_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/scheduled-reports",
            get(handlers::scheduled_report::list_scheduled_reports)
                .post(handlers::scheduled_report::create_scheduled_report),
        )
        .route(
            "/scheduled-reports/{id}",
            get(handlers::scheduled_report::get_scheduled_report)
                .put(handlers::scheduled_report::update_scheduled_report)
                .delete(handlers::scheduled_report::delete_scheduled_report),
        )
        .route(
            "/scheduled-reports/{id}/toggle-active",
            post(handlers::scheduled_report::toggle_scheduled_report_active),
        )
        .route(
            "/scheduled-reports/{id}/run",
            post(handlers::scheduled_report::run_scheduled_report_now),
        )
        .route(
            "/scheduled-reports/{id}/runs/{run_id}/download",
            get(handlers::scheduled_report::download_report_run),
        )
        .route(
            "/flash-sales",
            get(handlers::flash_sale::list_flash_sales)
                .post(handlers::flash_sale::create_flash_sale),
        )
        .route(
            "/flash-sales/{id}",
            get(handlers::flash_sale::get_flash_sale)
                .put(handlers::flash_sale::update_flash_sale)
                .delete(handlers::flash_sale::delete_flash_sale),
        )
        .route(
            "/flash-sales/{id}/toggle-active",
            post(handlers::flash_sale::toggle_flash_sale_active),
        )
}

/// 构建完整的后台 API 路由
///
/// 整合所有子路由，挂载到 `/admin` 前缀下
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/antiforgery/token", get(issue_token))
        .merge(gamification_routes())
        .merge(affiliate_routes())
        .merge(comment_routes())
        .merge(country_restriction_routes())
        .merge(analytics_routes())
        .merge(settings_routes())
        .merge(enrollment_routes())
        .merge(operations_routes())
        .merge(marketing_routes())
}

/// 构建带状态的应用路由
///
/// `/admin` 下的写操作经过防伪令牌校验；`/health` 不做校验
pub fn build_router(state: AppState) -> Router {
    let admin = api_routes().layer(middleware::from_fn_with_state(
        state.clone(),
        antiforgery_middleware,
    ));

    Router::new()
        .nest("/admin", admin)
        .route("/health", get(health_check))
        .with_state(state)
}

/// 存活探针：服务进程正常即返回 ok
async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "lms-admin-service"
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_routes_construction() {
        // 路径冲突或重复注册会在构建时 panic
        let _routes: Router<AppState> = api_routes();
    }
}
