use std::sync::Arc;

use axum::{routing::get, Json, Router};
use serde_json::{json, Map, Value};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::{authz, models, routes};

#[derive(OpenApi)]
#[openapi(
	paths(
		routes::health::health,
		routes::projects::list_projects,
		routes::projects::create_project,
		routes::projects::quota,
		routes::projects::get_project,
		routes::projects::update_project,
		routes::projects::delete_project,
		routes::members::list_members,
		routes::members::upsert_member,
		routes::groups::list_groups,
		routes::groups::create_group,
		routes::groups::delete_group,
		routes::groups::group_tasks,
		routes::groups::add_group_member,
		routes::groups::remove_group_member,
		routes::tasks::list_tasks,
		routes::tasks::create_task,
		routes::tasks::get_task,
		routes::tasks::update_task,
		routes::tasks::update_status,
		routes::tasks::delete_task
	),
	components(
		schemas(
			routes::health::HealthResponse,
			authz::GlobalRole,
			models::project::Project,
			models::project::ProjectStatus,
			models::project::ProjectCreateRequest,
			models::project::ProjectUpdateRequest,
			models::project::QuotaResponse,
			models::membership::ProjectRole,
			models::membership::ScopeKind,
			models::membership::MembershipView,
			models::membership::MembershipUpsertRequest,
			models::group::Group,
			models::group::GroupMember,
			models::group::GroupCreateRequest,
			models::group::GroupMemberRequest,
			models::task::Task,
			models::task::TaskStatus,
			models::task::TaskPriority,
			models::task::TaskCreateRequest,
			models::task::TaskUpdateRequest,
			models::task::TaskStatusRequest
		)
	),
	tags(
		(name = "Health", description = "Liveness"),
		(name = "Projects", description = "Projects and the ownership quota"),
		(name = "Memberships", description = "Project roles and visibility scopes"),
		(name = "Groups", description = "Task groups and their members"),
		(name = "Tasks", description = "Task creation and workflow")
	)
)]
pub struct ApiDoc;

/// Generated document plus the bearer scheme and a local server entry.
pub fn build_openapi(port: u16) -> anyhow::Result<utoipa::openapi::OpenApi> {
	let mut doc = serde_json::to_value(ApiDoc::openapi())?;

	let root = doc
		.as_object_mut()
		.ok_or_else(|| anyhow::anyhow!("OpenAPI root must be an object"))?;
	ensure_security_components(root)?;
	root.entry("security").or_insert_with(|| json!([{ "bearerAuth": [] }]));
	ensure_servers(root, port);

	Ok(serde_json::from_value(doc)?)
}

pub fn swagger_routes(doc: utoipa::openapi::OpenApi) -> anyhow::Result<Router> {
	let swagger_config = utoipa_swagger_ui::Config::new(["/api-docs/openapi.json"])
		.try_it_out_enabled(true)
		.persist_authorization(true);

	let doc_json = Arc::new(serde_json::to_value(&doc)?);
	let json_route = get(move || {
		let doc_json = Arc::clone(&doc_json);
		async move { Json((*doc_json).clone()) }
	});

	Ok(Router::new()
		.route("/api-docs/openapi.json", json_route)
		.merge(SwaggerUi::new("/docs").config(swagger_config)))
}

fn ensure_security_components(root: &mut Map<String, Value>) -> anyhow::Result<()> {
	let components = root
		.entry("components")
		.or_insert_with(|| Value::Object(Map::new()))
		.as_object_mut()
		.ok_or_else(|| anyhow::anyhow!("components must be an object"))?;

	let schemes = components
		.entry("securitySchemes")
		.or_insert_with(|| Value::Object(Map::new()))
		.as_object_mut()
		.ok_or_else(|| anyhow::anyhow!("securitySchemes must be an object"))?;

	schemes.insert(
		"bearerAuth".to_string(),
		json!({
			"type": "http",
			"scheme": "bearer",
			"bearerFormat": "JWT"
		}),
	);
	Ok(())
}

fn ensure_servers(root: &mut Map<String, Value>, port: u16) {
	let server_url = format!("http://localhost:{port}");

	match root.get_mut("servers") {
		Some(Value::Array(servers)) => {
			let present = servers
				.iter()
				.any(|v| v.get("url").and_then(Value::as_str) == Some(server_url.as_str()));
			if !present {
				servers.push(json!({ "url": server_url }));
			}
		}
		_ => {
			root.insert("servers".to_string(), json!([{ "url": server_url }]));
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn document_lists_scoped_routes_and_bearer_scheme() {
		let doc = serde_json::to_value(build_openapi(8000).unwrap()).unwrap();

		let paths = doc["paths"].as_object().unwrap();
		assert!(paths.contains_key("/projects/{id}/members"));
		assert!(paths.contains_key("/tasks/{id}/status"));
		assert!(paths.contains_key("/groups/{id}/members/{user_id}"));
		assert_eq!(doc["components"]["securitySchemes"]["bearerAuth"]["scheme"], "bearer");
		assert_eq!(doc["servers"][0]["url"], "http://localhost:8000");
	}
}
