mod common;

use anyhow::Result;
use axum::http::{Method, StatusCode};
use serde_json::json;

use common::{send, World};

#[tokio::test]
async fn class_lifecycle_over_http() -> Result<()> {
    let world = World::new().await;
    let app = world.router();
    let token = world.token(&world.manager);

    let (status, body) = send(
        &app,
        Method::POST,
        "/api/classes",
        Some(&token),
        Some(json!({ "name": "Grade 7A", "student_capacity": 2 })),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["success"], true);
    let class_id = body["data"]["id"].as_str().unwrap().to_string();

    let (status, body) = send(
        &app,
        Method::PATCH,
        &format!("/api/classes/{}", class_id),
        Some(&token),
        Some(json!({ "description": "Morning cohort" })),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["description"], "Morning cohort");

    let (status, body) = send(&app, Method::GET, "/api/classes?search=7a", Some(&token), None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["total"], 1);

    let (status, body) = send(
        &app,
        Method::POST,
        "/api/classes",
        Some(&token),
        Some(json!({ "name": "grade 7a", "student_capacity": 10 })),
    )
    .await?;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "DUPLICATE_CLASS_NAME");
    Ok(())
}

#[tokio::test]
async fn bulk_enroll_reports_partial_success() -> Result<()> {
    let world = World::new().await;
    let app = world.router();
    let token = world.token(&world.manager);
    let class = world.class(None, "7A", 2).await;
    let s = world.students(3).await;

    let (status, body) = send(
        &app,
        Method::POST,
        &format!("/api/classes/{}/students/bulk", class.id),
        Some(&token),
        Some(json!({ "student_ids": [s[0], s[1], s[2], "'; DROP TABLE students; --"], "notes": "term 1" })),
    )
    .await?;

    assert_eq!(status, StatusCode::OK);
    let data = &body["data"];
    assert_eq!(data["summary"]["total"], 3);
    assert_eq!(data["summary"]["succeeded"], 2);
    assert_eq!(data["failed"][0]["item"], s[2].to_string());
    assert_eq!(data["failed"][0]["error"], "CLASS_CAPACITY_EXCEEDED");
    Ok(())
}

#[tokio::test]
async fn single_enroll_errors_map_to_statuses() -> Result<()> {
    let world = World::new().await;
    let app = world.router();
    let token = world.token(&world.manager);
    let class = world.class(None, "7A", 1).await;
    let s = world.students(2).await;
    let uri = format!("/api/classes/{}/students", class.id);

    let (status, _) = send(&app, Method::POST, &uri, Some(&token), Some(json!({ "student_id": s[0] }))).await?;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = send(&app, Method::POST, &uri, Some(&token), Some(json!({ "student_id": s[0] }))).await?;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "STUDENT_ALREADY_ENROLLED");

    let (status, body) = send(&app, Method::POST, &uri, Some(&token), Some(json!({ "student_id": s[1] }))).await?;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "CLASS_CAPACITY_EXCEEDED");
    assert_eq!(body["error"]["context"]["capacity"], 1);

    let visitor = world.foreign_student().await;
    let (status, body) = send(&app, Method::POST, &uri, Some(&token), Some(json!({ "student_id": visitor }))).await?;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"]["code"], "CROSS_SCHOOL_ENROLLMENT");

    let (status, body) = send(&app, Method::POST, &uri, Some(&token), Some(json!({ "student": "x" }))).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "BAD_REQUEST");

    let (status, body) = send(&app, Method::GET, &uri, Some(&token), None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().map(Vec::len), Some(1));
    Ok(())
}

#[tokio::test]
async fn teacher_cannot_touch_unassigned_class() -> Result<()> {
    let world = World::new().await;
    let app = world.router();
    let token = world.token(&world.teacher);
    let class = world.class(None, "7B", 30).await;

    let (status, body) = send(&app, Method::GET, &format!("/api/classes/{}", class.id), Some(&token), None).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["code"], "UNAUTHORIZED_ACCESS");
    assert_eq!(body["error"]["context"]["class_ids"][0], class.id.to_string());
    Ok(())
}

#[tokio::test]
async fn remove_and_available_students_round_trip() -> Result<()> {
    let world = World::new().await;
    let app = world.router();
    let token = world.token(&world.manager);
    let class = world.class(None, "7A", 30).await;
    let s = world.students(3).await;

    send(
        &app,
        Method::POST,
        &format!("/api/classes/{}/students/bulk", class.id),
        Some(&token),
        Some(json!({ "student_ids": [s[0], s[1]] })),
    )
    .await?;

    let available = format!("/api/classes/{}/available-students?limit=500&sort_by=name", class.id);
    let (_, body) = send(&app, Method::GET, &available, Some(&token), None).await?;
    assert_eq!(body["data"]["total"], 1);
    assert_eq!(body["data"]["limit"], 100);

    let (status, _) = send(
        &app,
        Method::DELETE,
        &format!("/api/classes/{}/students/{}", class.id, s[0]),
        Some(&token),
        None,
    )
    .await?;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(
        &app,
        Method::POST,
        &format!("/api/classes/{}/students/remove", class.id),
        Some(&token),
        Some(json!({ "student_ids": [s[0], s[1]] })),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["succeeded"], json!([s[1]]));
    assert_eq!(body["data"]["failed"][0]["error"], "STUDENT_NOT_ENROLLED");

    let (_, body) = send(&app, Method::GET, &available, Some(&token), None).await?;
    assert_eq!(body["data"]["total"], 3);
    Ok(())
}

#[tokio::test]
async fn bulk_class_operations_over_http() -> Result<()> {
    let world = World::new().await;
    let app = world.router();
    let token = world.token(&world.manager);
    let busy = world.class(None, "Busy", 30).await;
    let empty = world.class(None, "Empty", 30).await;
    let s = world.students(1).await;
    send(
        &app,
        Method::POST,
        &format!("/api/classes/{}/students", busy.id),
        Some(&token),
        Some(json!({ "student_id": s[0] })),
    )
    .await?;

    let (status, body) = send(
        &app,
        Method::POST,
        "/api/classes/bulk/delete",
        Some(&token),
        Some(json!({ "class_ids": [busy.id, empty.id] })),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["succeeded"], json!([empty.id]));
    assert_eq!(body["data"]["failed"][0]["error"], "CLASS_HAS_STUDENTS");

    let (_, body) = send(
        &app,
        Method::POST,
        "/api/classes/bulk/restore",
        Some(&token),
        Some(json!({ "class_ids": [empty.id] })),
    )
    .await?;
    assert_eq!(body["data"]["summary"]["succeeded"], 1);

    let (_, body) = send(
        &app,
        Method::POST,
        "/api/classes/bulk/reassign",
        Some(&token),
        Some(json!({ "class_ids": [busy.id, empty.id], "teacher_id": world.teacher.id })),
    )
    .await?;
    assert_eq!(body["data"]["summary"]["succeeded"], 2);

    let (_, body) = send(
        &app,
        Method::POST,
        "/api/classes/bulk/update",
        Some(&token),
        Some(json!({ "class_ids": [busy.id], "changes": { "status": "inactive" } })),
    )
    .await?;
    assert_eq!(body["data"]["succeeded"], json!([busy.id]));

    world.audit.flush().await;
    assert!(world.audit_sink.records().len() >= 5);
    Ok(())
}

#[tokio::test]
async fn access_preflight_lists_every_denied_class() -> Result<()> {
    let world = World::new().await;
    let app = world.router();
    let token = world.token(&world.teacher);
    let own = world.class(Some(world.teacher.id), "Own", 30).await;
    let a = world.class(None, "A", 30).await;
    let b = world.class(None, "B", 30).await;

    let (status, body) = send(
        &app,
        Method::POST,
        "/api/classes/bulk/access",
        Some(&token),
        Some(json!({ "class_ids": [own.id, a.id, b.id], "operation": "delete" })),
    )
    .await?;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["context"]["class_ids"], json!([a.id, b.id]));

    let (status, body) = send(
        &app,
        Method::POST,
        "/api/classes/bulk/access",
        Some(&token),
        Some(json!({ "class_ids": [own.id] })),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"][0]["id"], own.id.to_string());
    Ok(())
}
