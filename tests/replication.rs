//! Fan-out on upload and reconciliation on rule activation.

mod common;

use common::{TestServer, files_in, payload};
use reqwest::{Method, StatusCode};
use serde_json::{Value, json};
use storage_gateway::audit::AuditAction;
use uuid::Uuid;

#[tokio::test]
async fn test_upload_fans_out_to_ciphered_replica() {
    let server = TestServer::start().await;
    let app = server.create_app("billing").await;

    let src_dir = server.dir("b-src");
    let dst_dir = server.dir("b-dst");
    let src = server.local_bucket(&app, "B-src", &src_dir, false).await;
    let dst = server.local_bucket(&app, "B-dst", &dst_dir, true).await;
    server.create_rule(&app, &src, &dst, true).await;

    let body = payload(1024);
    let resp = server.upload(&app, "B-src", "report.pdf", body.clone()).await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let uploaded: Value = resp.json().await.unwrap();
    assert_eq!(uploaded["original_name"], "report.pdf");
    assert_eq!(uploaded["file_size"], 1024);
    assert_eq!(uploaded["content_type"], "application/pdf");
    assert_eq!(uploaded["replicas"].as_array().unwrap().len(), 1);
    assert_eq!(uploaded["replica_failures"], 0);

    // one row per bucket
    let src_rows = server.store.list_files(src.parse().unwrap()).await.unwrap();
    let dst_rows = server.store.list_files(dst.parse().unwrap()).await.unwrap();
    assert_eq!(src_rows.len(), 1);
    assert_eq!(dst_rows.len(), 1);
    assert_ne!(src_rows[0].id, dst_rows[0].id);
    assert_eq!(dst_rows[0].checksum, src_rows[0].checksum);

    // plain in the source, sealed in the target
    let src_files = files_in(&src_dir);
    let dst_files = files_in(&dst_dir);
    assert_eq!(src_files.len(), 1);
    assert_eq!(dst_files.len(), 1);
    assert_eq!(std::fs::read(&src_files[0]).unwrap(), body);
    let sealed = std::fs::read(&dst_files[0]).unwrap();
    assert_eq!(sealed.len(), body.len() + 12 + 16);
    assert_ne!(&sealed[12..12 + 64], &body[..64]);
    assert!(dst_files[0].to_string_lossy().ends_with(".pdf"));

    // the replica opens transparently
    let replica_id = dst_rows[0].id.to_string();
    let resp = server.download(&app, &replica_id).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        resp.headers()["content-disposition"],
        "attachment; filename=\"report.pdf\""
    );
    assert_eq!(resp.bytes().await.unwrap().to_vec(), body);

    let meta: Value = server
        .http
        .get(server.url(&format!("/api/v1/storage/metadata/{replica_id}")))
        .header("X-API-Key", &app.key)
        .header("X-API-Secret", &app.secret)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(meta["is_ciphered"], true);

    assert_eq!(server.audit.count(AuditAction::FileUpload), 1);
    assert_eq!(server.audit.count(AuditAction::FileDownload), 1);
}

#[tokio::test]
async fn test_inactive_rule_does_not_replicate() {
    let server = TestServer::start().await;
    let app = server.create_app("quiet").await;
    let src = server.local_bucket(&app, "src", &server.dir("src"), false).await;
    let dst_dir = server.dir("dst");
    let dst = server.local_bucket(&app, "dst", &dst_dir, false).await;

    let created = server.create_rule(&app, &src, &dst, false).await;
    assert!(created["reconciliation"].is_null());

    let resp = server.upload(&app, "src", "a.txt", b"hello".to_vec()).await;
    assert_eq!(resp.status(), StatusCode::CREATED);

    assert_eq!(server.store.list_files(src.parse().unwrap()).await.unwrap().len(), 1);
    assert!(server.store.list_files(dst.parse().unwrap()).await.unwrap().is_empty());
    assert!(files_in(&dst_dir).is_empty());
}

#[tokio::test]
async fn test_activation_reconciles_missing_files_only() {
    let server = TestServer::start().await;
    let app = server.create_app("catchup").await;
    let src = server.local_bucket(&app, "src", &server.dir("src"), false).await;
    let dst = server.local_bucket(&app, "dst", &server.dir("dst"), true).await;

    for name in ["one.txt", "two.txt", "three.txt"] {
        let resp = server.upload(&app, "src", name, name.as_bytes().to_vec()).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
    }
    // already present in the target under the same name
    let resp = server.upload(&app, "dst", "two.txt", b"older copy".to_vec()).await;
    assert_eq!(resp.status(), StatusCode::CREATED);

    let created = server.create_rule(&app, &src, &dst, false).await;
    let rule_id = created["rule"]["id"].as_str().unwrap().to_string();

    let resp = server
        .admin(Method::PUT, &format!("/replication/{rule_id}/active"))
        .json(&json!({ "active": true }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::ACCEPTED);
    let toggled: Value = resp.json().await.unwrap();
    assert_eq!(toggled["rule"]["active"], true);
    let task_id = toggled["reconciliation"]["id"].as_str().unwrap().to_string();

    let task = server.wait_for_task(&task_id).await;
    assert_eq!(task["status"], "succeeded");
    assert_eq!(task["copied"], 2);
    assert_eq!(task["skipped"], 1);
    assert_eq!(task["failed"], 0);

    let names = server.store.file_names(dst.parse().unwrap()).await.unwrap();
    assert_eq!(names.len(), 3);
    let dst_rows = server.store.list_files(dst.parse().unwrap()).await.unwrap();
    assert_eq!(dst_rows.len(), 3);

    // the pre-existing copy was left alone
    let two = dst_rows.iter().find(|f| f.original_name == "two.txt").unwrap();
    let resp = server.download(&app, &two.id.to_string()).await;
    assert_eq!(resp.bytes().await.unwrap().as_ref(), b"older copy");

    // copies are sealed per the target and open back to the source bytes
    let one = dst_rows.iter().find(|f| f.original_name == "one.txt").unwrap();
    let resp = server.download(&app, &one.id.to_string()).await;
    assert_eq!(resp.bytes().await.unwrap().as_ref(), b"one.txt");

    // active -> active queues nothing
    let resp = server
        .admin(Method::PUT, &format!("/replication/{rule_id}/active"))
        .json(&json!({ "active": true }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let toggled: Value = resp.json().await.unwrap();
    assert!(toggled["reconciliation"].is_null());

    let tasks: Vec<Value> = server
        .admin(Method::GET, &format!("/replication/{rule_id}/tasks"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(server.audit.count(AuditAction::ReconciliationFinished), 1);
}

#[tokio::test]
async fn test_replica_failure_keeps_primary() {
    let server = TestServer::start().await;
    let app = server.create_app("flaky").await;
    let src_dir = server.dir("src");
    let src = server.local_bucket(&app, "src", &src_dir, false).await;

    // base path below a regular file can never be created
    let blocker = server.temp_dir.path().join("blocker");
    std::fs::write(&blocker, b"x").unwrap();
    let broken = server.local_bucket(&app, "broken", &blocker.join("sub"), false).await;
    let good_dir = server.dir("good");
    let good = server.local_bucket(&app, "good", &good_dir, false).await;

    server.create_rule(&app, &src, &broken, true).await;
    server.create_rule(&app, &src, &good, true).await;

    let resp = server.upload(&app, "src", "data.bin", payload(256)).await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["replicas"].as_array().unwrap().len(), 1);
    assert_eq!(body["replica_failures"], 1);

    assert_eq!(files_in(&src_dir).len(), 1);
    assert_eq!(files_in(&good_dir).len(), 1);
    assert!(server.store.list_files(broken.parse().unwrap()).await.unwrap().is_empty());
    assert!(server.audit.count(AuditAction::ReplicaUploadFailed) >= 1);
}

#[tokio::test]
async fn test_rule_validation() {
    let server = TestServer::start().await;
    let app = server.create_app("rules").await;
    let other = server.create_app("other").await;
    let a = server.local_bucket(&app, "a", &server.dir("a"), false).await;
    let b = server.local_bucket(&app, "b", &server.dir("b"), false).await;
    let foreign = server.local_bucket(&other, "c", &server.dir("c"), false).await;

    let post = |source: &str, target: &str| {
        server
            .admin(Method::POST, "/replication")
            .json(&json!({
                "app_id": app.id,
                "source_bucket_id": source,
                "target_bucket_id": target,
                "active": false,
            }))
            .send()
    };

    assert_eq!(post(&a, &a).await.unwrap().status(), StatusCode::BAD_REQUEST);
    assert_eq!(post(&a, &foreign).await.unwrap().status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        post(&a, &Uuid::new_v4().to_string()).await.unwrap().status(),
        StatusCode::NOT_FOUND
    );
    assert_eq!(post(&a, &b).await.unwrap().status(), StatusCode::CREATED);
    assert_eq!(post(&a, &b).await.unwrap().status(), StatusCode::CONFLICT);

    let rules: Vec<Value> = server
        .admin(Method::GET, &format!("/replication/app/{}", app.id))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(rules.len(), 1);

    let rule_id = rules[0]["id"].as_str().unwrap();
    let resp = server
        .admin(Method::DELETE, &format!("/replication/{rule_id}"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn test_reconciliation_reports_partial_and_failed_copies() {
    let server = TestServer::start().await;
    let app = server.create_app("lossy").await;
    let src_dir = server.dir("src");
    let src = server.local_bucket(&app, "src", &src_dir, false).await;
    let good_dir = server.dir("good");
    let good = server.local_bucket(&app, "good", &good_dir, false).await;
    let blocker = server.temp_dir.path().join("blocker");
    std::fs::write(&blocker, b"x").unwrap();
    let broken = server.local_bucket(&app, "broken", &blocker.join("sub"), false).await;

    for name in ["one.txt", "two.txt", "three.txt"] {
        let resp = server.upload(&app, "src", name, name.as_bytes().to_vec()).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
    }
    // one source object vanishes from disk
    let rows = server.store.list_files(src.parse().unwrap()).await.unwrap();
    let gone = rows.iter().find(|f| f.original_name == "two.txt").unwrap();
    std::fs::remove_file(&gone.physical_path).unwrap();

    // mixed outcome: two copies land, the missing object does not
    let created = server.create_rule(&app, &src, &good, true).await;
    let task_id = created["reconciliation"]["id"].as_str().unwrap().to_string();
    let task = server.wait_for_task(&task_id).await;
    assert_eq!(task["status"], "partial");
    assert_eq!(task["copied"], 2);
    assert_eq!(task["skipped"], 0);
    assert_eq!(task["failed"], 1);
    assert!(task["last_error"].is_string());
    assert_eq!(files_in(&good_dir).len(), 2);

    // unwritable target: nothing lands
    let created = server.create_rule(&app, &src, &broken, true).await;
    let task_id = created["reconciliation"]["id"].as_str().unwrap().to_string();
    let task = server.wait_for_task(&task_id).await;
    assert_eq!(task["status"], "failed");
    assert_eq!(task["copied"], 0);
    assert_eq!(task["failed"], 3);
    assert!(server.store.list_files(broken.parse().unwrap()).await.unwrap().is_empty());

    assert_eq!(server.audit.count(AuditAction::ReplicaUploadFailed), 4);
    assert_eq!(server.audit.count(AuditAction::ReconciliationFinished), 2);
}
