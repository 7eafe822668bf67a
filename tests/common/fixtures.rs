//! Mock catalog service

use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Technician every fixture report belongs to
pub const TECHNICIAN: &str = "Budi Santoso";

/// Body served for every fixture image
pub const IMAGE_BYTES: &[u8] = b"\xFF\xD8\xFF\xE0fake-jpeg";

/// Login plus the technician list for branch 7
pub async fn mount_login(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/web/api/auth/login"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": 200,
            "body": {
                "accessToken": "tok-it",
                "account": {"employee_branch_id": 7}
            }
        })))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/web/api/employee/no-paging"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "body": [
                {"id": 11, "fullname": TECHNICIAN},
                {"id": 12, "fullname": "Sari Dewi"}
            ]
        })))
        .mount(server)
        .await;
}

/// One client, one contract, `reports` March reports with `images_per_report` photos each
///
/// Report ids start at 100; photo URLs point back at `server` under `/files/`.
pub async fn mount_catalog(server: &MockServer, reports: u32, images_per_report: u32) {
    Mock::given(method("GET"))
        .and(path("/web/api/client/no-paging"))
        .and(query_param("branch_id", "7"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "body": [{"id": 501, "name": "Hotel Mawar"}]
        })))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/web/api/contract/501/client"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "body": [{"id": 9001}]
        })))
        .mount(server)
        .await;

    Mock::given(method("POST"))
        .and(path("/web/api/report/check-report-service"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "body": {"contract": {
                "clients": {"address": "Jl. Melati 5, Bandung"},
                "branches": {"name": "Bandung"}
            }}
        })))
        .mount(server)
        .await;

    let sts: Vec<_> = (0..reports)
        .map(|i| {
            json!({
                "schedule_id": 100 + i,
                "date_work": format!("2024-03-{:02}", 1 + i % 28),
                "employee_id": 11,
                "employee_name": TECHNICIAN,
                "sequence_number": i + 1,
                "visit_total_base_period_contract": reports
            })
        })
        .collect();
    Mock::given(method("POST"))
        .and(path("/web/api/report/form-sts"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "body": sts })))
        .mount(server)
        .await;

    for i in 0..reports {
        let schedule_id = 100 + i;
        let files: Vec<_> = (1..=images_per_report)
            .map(|n| {
                json!({
                    "id": n,
                    "filename": format!("{}/files/{}_{}.jpg", server.uri(), schedule_id, n),
                    "notes": format!("photo {n}")
                })
            })
            .collect();
        Mock::given(method("POST"))
            .and(path("/web/api/schedule/file-uploaded"))
            .and(body_partial_json(json!({"schedule_id": schedule_id})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "body": files })))
            .mount(server)
            .await;
    }
}

/// Serve every image under `/files/` to requests carrying the session token
pub async fn mount_images(server: &MockServer) {
    Mock::given(method("GET"))
        .and(wiremock::matchers::path_regex(r"^/files/.+"))
        .and(header("authorization", "Bearer tok-it"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(IMAGE_BYTES.to_vec()))
        .mount(server)
        .await;
}
