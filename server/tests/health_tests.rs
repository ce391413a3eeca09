mod common;

use actix_web::{test, web, App};

use launchpad::handlers;
use mongodb::bson::oid::ObjectId;

use common::context;

#[actix_web::test]
async fn test_health_check() {
    let ctx = context();

    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(ctx.state.clone()))
            .service(handlers::health_check),
    )
    .await;

    let req = test::TestRequest::get().uri("/health").to_request();
    let resp = test::call_service(&app, req).await;

    assert!(resp.status().is_success());

    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["active_sessions"], 0);
}

#[actix_web::test]
async fn test_health_check_counts_sessions() {
    let ctx = context();
    ctx.state
        .sessions
        .create_session(ObjectId::new(), None, None)
        .await
        .unwrap();

    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(ctx.state.clone()))
            .service(handlers::health_check),
    )
    .await;

    let req = test::TestRequest::get().uri("/health").to_request();
    let resp = test::call_service(&app, req).await;

    assert!(resp.status().is_success());

    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["active_sessions"], 1);
}
