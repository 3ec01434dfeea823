// Axum web server layer

use axum::error_handling::HandleErrorLayer;
use axum::extract::{DefaultBodyLimit, Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::routing::{get, patch, post};
use axum::{BoxError, Router};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

pub mod cache;
pub mod handlers;
pub mod responses;

use crate::auth::{AuthState, SecurityEventLogger};
use crate::config::Config;
use crate::iam::AccessEngine;
use crate::store::Stores;
use cache::ResponseCache;

/// Application state shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub stores: Arc<Stores>,
    pub engine: AccessEngine,
    pub cache: ResponseCache,
    pub audit: SecurityEventLogger,
    pub config: Arc<Config>,
}

/// Paths reachable without a session token.
fn is_public_path(path: &str) -> bool {
    matches!(path, "/health" | "/metrics" | "/api/iam/login")
}

/// Create the Axum router with all routes and middleware.
///
/// Middleware stack (outermost to innermost):
/// - Request tracing (tower-http::trace)
/// - Request timeout (tower::timeout) behind HandleErrorLayer
/// - Body size limit (tower-http::limit)
/// - Auth middleware on protected routes (route_layer)
pub fn create_router(app_state: AppState, auth_state: Arc<AuthState>) -> Router {
    let body_limit = app_state.config.body_size_limit_bytes;
    let timeout_secs = app_state.config.request_timeout_secs;

    let mut router = Router::new()
        // Unauthenticated surface
        .route("/health", get(handlers::meta::health))
        .route("/metrics", get(handlers::meta::metrics))
        .route("/api/iam/login", post(handlers::iam::login))
        // Session
        .route("/api/iam/logout", post(handlers::iam::logout))
        .route("/api/iam/current-user", get(handlers::iam::current_user))
        // Folders
        .route(
            "/api/folders",
            get(handlers::folders::list).post(handlers::folders::create),
        )
        .route("/api/folders/org_tree", get(handlers::folders::org_tree))
        .route(
            "/api/folders/:id",
            get(handlers::folders::retrieve)
                .patch(handlers::folders::update)
                .delete(handlers::folders::destroy),
        )
        .route("/api/folders/:id/object", get(handlers::folders::object))
        // Users
        .route(
            "/api/users",
            get(handlers::users::list).post(handlers::users::create),
        )
        .route(
            "/api/users/:id",
            get(handlers::users::retrieve)
                .patch(handlers::users::update)
                .delete(handlers::users::destroy),
        )
        .route("/api/users/:id/object", get(handlers::users::object))
        // User groups
        .route(
            "/api/user-groups",
            get(handlers::users::list_groups).post(handlers::users::create_group),
        )
        .route(
            "/api/user-groups/:id",
            get(handlers::users::retrieve_group)
                .patch(handlers::users::update_group)
                .delete(handlers::users::destroy_group),
        )
        .route(
            "/api/user-groups/:id/object",
            get(handlers::users::group_object),
        )
        // Roles (read-only)
        .route("/api/roles", get(handlers::users::list_roles))
        .route("/api/roles/:id", get(handlers::users::retrieve_role))
        // Role assignments
        .route(
            "/api/role-assignments",
            get(handlers::users::list_assignments).post(handlers::users::create_assignment),
        )
        .route(
            "/api/role-assignments/:id",
            get(handlers::users::retrieve_assignment)
                .patch(handlers::users::update_assignment)
                .delete(handlers::users::destroy_assignment),
        )
        .route(
            "/api/role-assignments/:id/object",
            get(handlers::users::assignment_object),
        )
        // Projects
        .route(
            "/api/projects",
            get(handlers::projects::list).post(handlers::projects::create),
        )
        .route("/api/projects/names", get(handlers::projects::names))
        .route("/api/projects/lc_status", get(handlers::projects::lc_status))
        .route(
            "/api/projects/quality_check",
            get(handlers::projects::quality_check_all),
        )
        .route(
            "/api/projects/:id",
            get(handlers::projects::retrieve)
                .patch(handlers::projects::update)
                .delete(handlers::projects::destroy),
        )
        .route("/api/projects/:id/object", get(handlers::projects::object))
        .route(
            "/api/projects/:id/quality_check",
            get(handlers::projects::quality_check),
        )
        // Threats
        .route(
            "/api/threats",
            get(handlers::threats::list).post(handlers::threats::create),
        )
        .route(
            "/api/threats/threats_count",
            get(handlers::threats::threats_count),
        )
        .route(
            "/api/threats/:id",
            get(handlers::threats::retrieve)
                .patch(handlers::threats::update)
                .delete(handlers::threats::destroy),
        )
        .route("/api/threats/:id/object", get(handlers::threats::object))
        // Assets
        .route(
            "/api/assets",
            get(handlers::assets::list).post(handlers::assets::create),
        )
        .route("/api/assets/type", get(handlers::assets::type_choices))
        .route(
            "/api/assets/:id",
            get(handlers::assets::retrieve)
                .patch(handlers::assets::update)
                .delete(handlers::assets::destroy),
        )
        .route("/api/assets/:id/object", get(handlers::assets::object))
        // Reference controls
        .route(
            "/api/reference-controls",
            get(handlers::reference_controls::list).post(handlers::reference_controls::create),
        )
        .route(
            "/api/reference-controls/category",
            get(handlers::reference_controls::category_choices),
        )
        .route(
            "/api/reference-controls/csf_function",
            get(handlers::reference_controls::csf_function_choices),
        )
        .route(
            "/api/reference-controls/:id",
            get(handlers::reference_controls::retrieve)
                .patch(handlers::reference_controls::update)
                .delete(handlers::reference_controls::destroy),
        )
        .route(
            "/api/reference-controls/:id/object",
            get(handlers::reference_controls::object),
        )
        // Risk matrices
        .route(
            "/api/risk-matrices",
            get(handlers::matrices::list).post(handlers::matrices::create),
        )
        .route("/api/risk-matrices/colors", get(handlers::matrices::colors))
        .route("/api/risk-matrices/used", get(handlers::matrices::used))
        .route(
            "/api/risk-matrices/:id",
            get(handlers::matrices::retrieve).delete(handlers::matrices::destroy),
        )
        // Risk assessments
        .route(
            "/api/risk-assessments",
            get(handlers::risk_assessments::list).post(handlers::risk_assessments::create),
        )
        .route(
            "/api/risk-assessments/status",
            get(handlers::risk_assessments::status_choices),
        )
        .route(
            "/api/risk-assessments/per_status",
            get(handlers::risk_assessments::per_status),
        )
        .route(
            "/api/risk-assessments/quality_check",
            get(handlers::risk_assessments::quality_check_all),
        )
        .route(
            "/api/risk-assessments/:id",
            get(handlers::risk_assessments::retrieve)
                .patch(handlers::risk_assessments::update)
                .delete(handlers::risk_assessments::destroy),
        )
        .route(
            "/api/risk-assessments/:id/object",
            get(handlers::risk_assessments::object),
        )
        .route(
            "/api/risk-assessments/:id/quality_check",
            get(handlers::risk_assessments::quality_check),
        )
        .route(
            "/api/risk-assessments/:id/plan",
            get(handlers::risk_assessments::plan),
        )
        .route(
            "/api/risk-assessments/:id/treatment_plan_csv",
            get(handlers::risk_assessments::treatment_plan_csv),
        )
        .route(
            "/api/risk-assessments/:id/risk_assessment_csv",
            get(handlers::risk_assessments::risk_assessment_csv),
        )
        .route(
            "/api/risk-assessments/:id/risk_assessment_pdf",
            get(handlers::risk_assessments::risk_assessment_pdf),
        )
        .route(
            "/api/risk-assessments/:id/treatment_plan_pdf",
            get(handlers::risk_assessments::treatment_plan_pdf),
        )
        .route(
            "/api/risk-assessments/:id/duplicate",
            post(handlers::risk_assessments::duplicate),
        )
        // Risk scenarios
        .route(
            "/api/risk-scenarios",
            get(handlers::risk_scenarios::list).post(handlers::risk_scenarios::create),
        )
        .route(
            "/api/risk-scenarios/treatment",
            get(handlers::risk_scenarios::treatment_choices),
        )
        .route(
            "/api/risk-scenarios/qualifications",
            get(handlers::risk_scenarios::qualification_choices),
        )
        .route(
            "/api/risk-scenarios/count_per_level",
            get(handlers::risk_scenarios::count_per_level),
        )
        .route(
            "/api/risk-scenarios/per_status",
            get(handlers::risk_scenarios::per_status),
        )
        .route(
            "/api/risk-scenarios/:id",
            get(handlers::risk_scenarios::retrieve)
                .patch(handlers::risk_scenarios::update)
                .delete(handlers::risk_scenarios::destroy),
        )
        .route(
            "/api/risk-scenarios/:id/object",
            get(handlers::risk_scenarios::object),
        )
        .route(
            "/api/risk-scenarios/:id/probability",
            get(handlers::risk_scenarios::probability),
        )
        .route(
            "/api/risk-scenarios/:id/impact",
            get(handlers::risk_scenarios::impact),
        )
        .route(
            "/api/risk-scenarios/:id/strength_of_knowledge",
            get(handlers::risk_scenarios::strength_of_knowledge),
        )
        // Risk acceptances
        .route(
            "/api/risk-acceptances",
            get(handlers::risk_acceptances::list).post(handlers::risk_acceptances::create),
        )
        .route(
            "/api/risk-acceptances/to_review",
            get(handlers::risk_acceptances::to_review),
        )
        .route(
            "/api/risk-acceptances/waiting",
            get(handlers::risk_acceptances::waiting),
        )
        .route(
            "/api/risk-acceptances/:id",
            get(handlers::risk_acceptances::retrieve)
                .patch(handlers::risk_acceptances::update)
                .delete(handlers::risk_acceptances::destroy),
        )
        .route(
            "/api/risk-acceptances/:id/object",
            get(handlers::risk_acceptances::object),
        )
        .route(
            "/api/risk-acceptances/:id/accept",
            post(handlers::risk_acceptances::accept),
        )
        .route(
            "/api/risk-acceptances/:id/reject",
            post(handlers::risk_acceptances::reject),
        )
        .route(
            "/api/risk-acceptances/:id/revoke",
            post(handlers::risk_acceptances::revoke),
        )
        // Applied controls
        .route(
            "/api/applied-controls",
            get(handlers::applied_controls::list).post(handlers::applied_controls::create),
        )
        .route(
            "/api/applied-controls/status",
            get(handlers::applied_controls::status_choices),
        )
        .route(
            "/api/applied-controls/category",
            get(handlers::applied_controls::category_choices),
        )
        .route(
            "/api/applied-controls/csf_function",
            get(handlers::applied_controls::csf_function_choices),
        )
        .route(
            "/api/applied-controls/effort",
            get(handlers::applied_controls::effort_choices),
        )
        .route(
            "/api/applied-controls/per_status",
            get(handlers::applied_controls::per_status),
        )
        .route(
            "/api/applied-controls/todo",
            get(handlers::applied_controls::todo),
        )
        .route(
            "/api/applied-controls/to_review",
            get(handlers::applied_controls::to_review),
        )
        .route(
            "/api/applied-controls/updatables",
            get(handlers::applied_controls::updatables),
        )
        .route(
            "/api/applied-controls/export_csv",
            get(handlers::applied_controls::export_csv),
        )
        .route(
            "/api/applied-controls/:id",
            get(handlers::applied_controls::retrieve)
                .patch(handlers::applied_controls::update)
                .delete(handlers::applied_controls::destroy),
        )
        .route(
            "/api/applied-controls/:id/object",
            get(handlers::applied_controls::object),
        )
        // Policies (applied controls with category = policy)
        .route("/api/policies", get(handlers::applied_controls::list_policies))
        .route(
            "/api/policies/per_status",
            get(handlers::applied_controls::policies_per_status),
        )
        .route(
            "/api/policies/csf_function",
            get(handlers::applied_controls::csf_function_choices),
        )
        // Evidences
        .route(
            "/api/evidences",
            get(handlers::evidences::list).post(handlers::evidences::create),
        )
        .route(
            "/api/evidences/:id",
            get(handlers::evidences::retrieve)
                .patch(handlers::evidences::update)
                .delete(handlers::evidences::destroy),
        )
        .route("/api/evidences/:id/object", get(handlers::evidences::object))
        .route(
            "/api/evidences/:id/attachment",
            get(handlers::evidences::attachment),
        )
        .route("/api/evidences/:id/upload", post(handlers::evidences::upload))
        .route(
            "/api/evidences/:id/delete_attachment",
            post(handlers::evidences::delete_attachment),
        )
        // Frameworks
        .route("/api/frameworks", get(handlers::frameworks::list))
        .route("/api/frameworks/names", get(handlers::frameworks::names))
        .route("/api/frameworks/used", get(handlers::frameworks::used))
        .route(
            "/api/frameworks/:id",
            get(handlers::frameworks::retrieve).delete(handlers::frameworks::destroy),
        )
        .route("/api/frameworks/:id/tree", get(handlers::frameworks::tree))
        .route(
            "/api/frameworks/:id/mappings",
            get(handlers::frameworks::mappings),
        )
        // Requirement nodes (read-only)
        .route(
            "/api/requirement-nodes",
            get(handlers::frameworks::list_nodes),
        )
        .route(
            "/api/requirement-nodes/:id",
            get(handlers::frameworks::retrieve_node),
        )
        // Requirement mapping sets (read-only)
        .route(
            "/api/requirement-mapping-sets",
            get(handlers::frameworks::list_mapping_sets),
        )
        .route(
            "/api/requirement-mapping-sets/:id",
            get(handlers::frameworks::retrieve_mapping_set),
        )
        // Compliance assessments
        .route(
            "/api/compliance-assessments",
            get(handlers::compliance::list).post(handlers::compliance::create),
        )
        .route(
            "/api/compliance-assessments/status",
            get(handlers::compliance::status_choices),
        )
        .route(
            "/api/compliance-assessments/per_status",
            get(handlers::compliance::per_status),
        )
        .route(
            "/api/compliance-assessments/quality_check",
            get(handlers::compliance::quality_check_all),
        )
        .route(
            "/api/compliance-assessments/:id",
            get(handlers::compliance::retrieve)
                .patch(handlers::compliance::update)
                .delete(handlers::compliance::destroy),
        )
        .route(
            "/api/compliance-assessments/:id/object",
            get(handlers::compliance::object),
        )
        .route(
            "/api/compliance-assessments/:id/selected_implementation_groups",
            get(handlers::compliance::selected_implementation_groups),
        )
        .route(
            "/api/compliance-assessments/:id/quality_check",
            get(handlers::compliance::quality_check),
        )
        .route(
            "/api/compliance-assessments/:id/global_score",
            get(handlers::compliance::global_score),
        )
        .route(
            "/api/compliance-assessments/:id/donut_data",
            get(handlers::compliance::donut_data),
        )
        .route(
            "/api/compliance-assessments/:id/action_plan",
            get(handlers::compliance::action_plan),
        )
        .route(
            "/api/compliance-assessments/:id/action_plan_pdf",
            get(handlers::compliance::action_plan_pdf),
        )
        .route(
            "/api/compliance-assessments/:id/compliance_assessment_csv",
            get(handlers::compliance::compliance_assessment_csv),
        )
        .route(
            "/api/compliance-assessments/:id/tree",
            get(handlers::compliance::tree),
        )
        .route(
            "/api/compliance-assessments/:id/requirements_list",
            get(handlers::compliance::requirements_list),
        )
        .route(
            "/api/compliance-assessments/:id/export",
            get(handlers::compliance::export),
        )
        .route(
            "/api/compliance-assessments/:id/create_suggested_applied_controls",
            post(handlers::compliance::create_suggested_applied_controls),
        )
        // Requirement assessments
        .route(
            "/api/requirement-assessments",
            get(handlers::compliance::list_requirement_assessments),
        )
        .route(
            "/api/requirement-assessments/status",
            get(handlers::compliance::requirement_status_choices),
        )
        .route(
            "/api/requirement-assessments/result",
            get(handlers::compliance::requirement_result_choices),
        )
        .route(
            "/api/requirement-assessments/:id",
            patch(handlers::compliance::update_requirement_assessment)
                .get(handlers::compliance::retrieve_requirement_assessment),
        )
        .route(
            "/api/requirement-assessments/:id/create_suggested_applied_controls",
            post(handlers::compliance::ra_create_suggested_applied_controls),
        )
        // Cross-cutting aggregates
        .route("/api/get_counters", get(handlers::meta::get_counters))
        .route("/api/get_metrics", get(handlers::meta::get_metrics))
        .route("/api/get_agg_data", get(handlers::meta::get_agg_data))
        .route(
            "/api/get_composer_data",
            get(handlers::meta::get_composer_data),
        )
        .route(
            "/api/get_controls_info",
            get(handlers::meta::get_controls_info),
        )
        .route(
            "/api/get_timeline_info",
            get(handlers::meta::get_timeline_info),
        )
        .route("/api/build", get(handlers::meta::build));

    // Auth on every route except the public surface.
    router = router.route_layer(axum::middleware::from_fn_with_state(
        auth_state,
        |state: State<Arc<AuthState>>, request: Request, next: Next| async move {
            if is_public_path(request.uri().path()) {
                return Ok(next.run(request).await);
            }
            crate::auth::auth_middleware(state, request, next).await
        },
    ));

    // Global body size limit. Attachment uploads are additionally
    // capped against ATTACHMENT_SIZE_LIMIT_BYTES inside the upload
    // handler, which rejects oversized bodies with 413.
    router = router.layer(RequestBodyLimitLayer::new(body_limit));
    router = router.layer(DefaultBodyLimit::max(body_limit));

    // Timeout with HandleErrorLayer to convert the elapsed error into a
    // response, then tracing outermost.
    let middleware_stack = ServiceBuilder::new()
        .layer(TraceLayer::new_for_http())
        .layer(axum::middleware::from_fn(handlers::meta::track))
        .layer(HandleErrorLayer::new(|e: BoxError| async move {
            let status = if e.is::<tower::timeout::error::Elapsed>() {
                StatusCode::REQUEST_TIMEOUT
            } else {
                StatusCode::INTERNAL_SERVER_ERROR
            };
            (status, e.to_string())
        }))
        .timeout(Duration::from_secs(timeout_secs))
        .into_inner();

    router.layer(middleware_stack).with_state(app_state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_paths() {
        assert!(is_public_path("/health"));
        assert!(is_public_path("/metrics"));
        assert!(is_public_path("/api/iam/login"));
        assert!(!is_public_path("/api/projects"));
        assert!(!is_public_path("/api/iam/logout"));
    }
}
