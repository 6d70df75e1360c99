#[cfg(test)]
mod integration_tests {
    use crate::handlers::users::{CreateUserRequest, UpdateUserRequest};
    use crate::passwords::verify_password;
    use crate::schemas::{ApiResponse, ErrorResponse};
    use crate::test_utils::test_utils::{
        admin_auth, basic_auth, member_auth, seed_user, setup_test_app, setup_test_app_with_state,
        MEMBER_USERNAME, TEST_PASSWORD,
    };
    use axum::http::{header, StatusCode};
    use axum_test::multipart::{MultipartForm, Part};
    use axum_test::TestServer;
    use model::entities::user;
    use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, Set};
    use serde_json::{json, Value};

    const PNG_BYTES: [u8; 16] = [
        0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0x0D, b'I', b'H', b'D', b'R',
    ];

    fn create_request(username: &str) -> CreateUserRequest {
        CreateUserRequest {
            username: username.to_string(),
            password: "Velvet-Harbor-93".to_string(),
            password_confirm: None,
            email: format!("{}@example.com", username),
            first_name: String::new(),
            last_name: String::new(),
            phone_number: None,
        }
    }

    async fn create_via_api(server: &TestServer, request: &CreateUserRequest) -> Value {
        let (name, value) = admin_auth();
        let response = server.post("/api/v1/users").add_header(name, value).json(request).await;
        if response.status_code() != StatusCode::CREATED {
            panic!("Expected 201 Created, got {}: {}", response.status_code(), response.text());
        }
        let body: ApiResponse<Value> = response.json();
        body.data
    }

    #[tokio::test]
    async fn test_health_check() {
        let app = setup_test_app().await;
        let server = TestServer::new(app).unwrap();

        let response = server.get("/health").await;

        response.assert_status(StatusCode::OK);
        let body: Value = response.json();
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["database"], "connected");
    }

    #[tokio::test]
    async fn test_users_require_authentication() {
        let app = setup_test_app().await;
        let server = TestServer::new(app).unwrap();

        let response = server.get("/api/v1/users").await;

        response.assert_status(StatusCode::UNAUTHORIZED);
        assert!(response
            .header(header::WWW_AUTHENTICATE)
            .to_str()
            .unwrap()
            .starts_with("Basic"));
        let body: ErrorResponse = response.json();
        assert!(!body.success);
        assert_eq!(body.code, "NOT_AUTHENTICATED");
    }

    #[tokio::test]
    async fn test_me_unauthenticated_returns_no_record() {
        let app = setup_test_app().await;
        let server = TestServer::new(app).unwrap();

        let response = server.get("/api/v1/users/me").await;

        response.assert_status(StatusCode::UNAUTHORIZED);
        let body: Value = response.json();
        assert!(body.get("data").is_none());
        assert!(!response.text().contains(MEMBER_USERNAME));
    }

    #[tokio::test]
    async fn test_me_returns_caller() {
        let app = setup_test_app().await;
        let server = TestServer::new(app).unwrap();

        let (name, value) = member_auth();
        let response = server.get("/api/v1/users/me").add_header(name, value).await;

        response.assert_status(StatusCode::OK);
        let body: ApiResponse<Value> = response.json();
        assert_eq!(body.data["username"], MEMBER_USERNAME);
        assert!(body.data.get("password").is_none());
    }

    #[tokio::test]
    async fn test_wrong_password_is_rejected() {
        let app = setup_test_app().await;
        let server = TestServer::new(app).unwrap();

        let (name, value) = basic_auth(MEMBER_USERNAME, "not-the-password");
        let response = server.get("/api/v1/users/me").add_header(name, value).await;

        response.assert_status(StatusCode::UNAUTHORIZED);
        let body: ErrorResponse = response.json();
        assert_eq!(body.code, "AUTHENTICATION_FAILED");
    }

    #[tokio::test]
    async fn test_inactive_user_is_rejected() {
        let (app, state) = setup_test_app_with_state().await;
        let server = TestServer::new(app).unwrap();

        let dormant = seed_user(&state.db, "dormant", false).await;
        let mut active: user::ActiveModel = dormant.into();
        active.is_active = Set(false);
        active.update(&state.db).await.unwrap();

        let (name, value) = basic_auth("dormant", TEST_PASSWORD);
        let response = server.get("/api/v1/users/me").add_header(name, value).await;

        response.assert_status(StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_create_user_hashes_password() {
        let (app, state) = setup_test_app_with_state().await;
        let server = TestServer::new(app).unwrap();

        let data = create_via_api(&server, &create_request("testuser")).await;

        assert_eq!(data["username"], "testuser");
        assert!(data["id"].as_i64().unwrap() > 0);
        assert!(data.get("password").is_none());

        let stored = user::Entity::find()
            .filter(user::Column::Username.eq("testuser"))
            .one(&state.db)
            .await
            .unwrap()
            .unwrap();
        assert_ne!(stored.password, "Velvet-Harbor-93");
        assert!(verify_password("Velvet-Harbor-93", &stored.password));
        assert!(stored.is_active);
        assert!(!stored.is_staff);
        assert!(stored.created_by_id.is_some());
    }

    #[tokio::test]
    async fn test_duplicate_username_leaves_one_record() {
        let (app, state) = setup_test_app_with_state().await;
        let server = TestServer::new(app).unwrap();

        create_via_api(&server, &create_request("dupe")).await;

        let (name, value) = admin_auth();
        let response = server
            .post("/api/v1/users")
            .add_header(name, value)
            .json(&create_request("DUPE"))
            .await;

        response.assert_status(StatusCode::BAD_REQUEST);
        let body: ErrorResponse = response.json();
        assert_eq!(body.code, "VALIDATION_ERROR");
        let fields = body.fields.unwrap();
        assert_eq!(fields["username"], vec!["A user with that username already exists.".to_string()]);

        let count = user::Entity::find()
            .filter(user::Column::Username.eq("dupe"))
            .count(&state.db)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_create_collects_field_errors() {
        let (app, state) = setup_test_app_with_state().await;
        let server = TestServer::new(app).unwrap();
        let before = user::Entity::find().count(&state.db).await.unwrap();

        let mut request = create_request("bad name");
        request.password = "123".to_string();
        request.password_confirm = Some("321".to_string());
        request.email = "nope".to_string();

        let (name, value) = admin_auth();
        let response = server.post("/api/v1/users").add_header(name, value).json(&request).await;

        response.assert_status(StatusCode::BAD_REQUEST);
        let fields = response.json::<ErrorResponse>().fields.unwrap();
        assert!(fields.contains_key("username"));
        assert!(fields.contains_key("email"));
        assert!(fields.contains_key("password"));
        assert_eq!(
            fields["password_confirm"],
            vec!["The two password fields didn't match.".to_string()]
        );
        assert_eq!(user::Entity::find().count(&state.db).await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_update_without_password_keeps_hash() {
        let (app, state) = setup_test_app_with_state().await;
        let server = TestServer::new(app).unwrap();

        let created = create_via_api(&server, &create_request("keeper")).await;
        let id = created["id"].as_i64().unwrap();
        let before = user::Entity::find_by_id(id as i32).one(&state.db).await.unwrap().unwrap();

        let (name, value) = admin_auth();
        let response = server
            .patch(&format!("/api/v1/users/{}", id))
            .add_header(name, value)
            .json(&UpdateUserRequest {
                first_name: Some("Kept".to_string()),
                password: Some(String::new()),
                ..Default::default()
            })
            .await;
        response.assert_status(StatusCode::OK);
        let body: ApiResponse<Value> = response.json();
        assert_eq!(body.data["first_name"], "Kept");

        let after = user::Entity::find_by_id(id as i32).one(&state.db).await.unwrap().unwrap();
        assert_eq!(after.password, before.password);
        assert!(after.updated_at >= before.updated_at);

        // The old password still authenticates
        let (name, value) = basic_auth("keeper", "Velvet-Harbor-93");
        server
            .get("/api/v1/users/me")
            .add_header(name, value)
            .await
            .assert_status(StatusCode::OK);
    }

    #[tokio::test]
    async fn test_update_with_password_rehashes() {
        let app = setup_test_app().await;
        let server = TestServer::new(app).unwrap();

        let created = create_via_api(&server, &create_request("rotator")).await;
        let id = created["id"].as_i64().unwrap();

        let (name, value) = admin_auth();
        server
            .patch(&format!("/api/v1/users/{}", id))
            .add_header(name, value)
            .json(&UpdateUserRequest {
                password: Some("Copper-Lantern-71".to_string()),
                password_confirm: Some("Copper-Lantern-71".to_string()),
                ..Default::default()
            })
            .await
            .assert_status(StatusCode::OK);

        let (name, value) = basic_auth("rotator", "Copper-Lantern-71");
        server
            .get("/api/v1/users/me")
            .add_header(name, value)
            .await
            .assert_status(StatusCode::OK);

        let (name, value) = basic_auth("rotator", "Velvet-Harbor-93");
        server
            .get("/api/v1/users/me")
            .add_header(name, value)
            .await
            .assert_status(StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_put_requires_username() {
        let app = setup_test_app().await;
        let server = TestServer::new(app).unwrap();

        let created = create_via_api(&server, &create_request("putter")).await;
        let id = created["id"].as_i64().unwrap();

        let (name, value) = admin_auth();
        let response = server
            .put(&format!("/api/v1/users/{}", id))
            .add_header(name.clone(), value.clone())
            .json(&UpdateUserRequest {
                email: Some("new@example.com".to_string()),
                ..Default::default()
            })
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
        assert!(response.json::<ErrorResponse>().fields.unwrap().contains_key("username"));

        let response = server
            .put(&format!("/api/v1/users/{}", id))
            .add_header(name, value)
            .json(&UpdateUserRequest {
                username: Some("putter2".to_string()),
                email: Some("new@example.com".to_string()),
                ..Default::default()
            })
            .await;
        response.assert_status(StatusCode::OK);
        let body: ApiResponse<Value> = response.json();
        assert_eq!(body.data["username"], "putter2");
        assert_eq!(body.data["email"], "new@example.com");
    }

    #[tokio::test]
    async fn test_rename_to_taken_username_fails() {
        let app = setup_test_app().await;
        let server = TestServer::new(app).unwrap();

        let created = create_via_api(&server, &create_request("renamer")).await;
        let id = created["id"].as_i64().unwrap();

        let (name, value) = admin_auth();
        let response = server
            .patch(&format!("/api/v1/users/{}", id))
            .add_header(name, value)
            .json(&UpdateUserRequest {
                username: Some(MEMBER_USERNAME.to_string()),
                ..Default::default()
            })
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_list_projection_has_no_password() {
        let app = setup_test_app().await;
        let server = TestServer::new(app).unwrap();

        let (name, value) = member_auth();
        let response = server.get("/api/v1/users").add_header(name, value).await;

        response.assert_status(StatusCode::OK);
        let body: ApiResponse<Value> = response.json();
        assert_eq!(body.data["count"], 2);
        let results = body.data["results"].as_array().unwrap();
        assert_eq!(results.len(), 2);
        for item in results {
            assert!(item.get("password").is_none());
            assert!(item.get("full_name").is_some());
            assert!(item.get("email").is_some());
        }
        assert!(!response.text().contains("argon2"));
    }

    #[tokio::test]
    async fn test_search_by_phone_only() {
        let app = setup_test_app().await;
        let server = TestServer::new(app).unwrap();

        let mut with_phone = create_request("caller");
        with_phone.phone_number = Some("+998901234567".to_string());
        create_via_api(&server, &with_phone).await;
        create_via_api(&server, &create_request("silent")).await;

        let (name, value) = admin_auth();
        let response = server
            .get("/api/v1/users")
            .add_query_param("search", "9012345")
            .add_header(name, value)
            .await;

        response.assert_status(StatusCode::OK);
        let body: ApiResponse<Value> = response.json();
        let results = body.data["results"].as_array().unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0]["username"], "caller");
    }

    #[tokio::test]
    async fn test_search_terms_must_all_match() {
        let app = setup_test_app().await;
        let server = TestServer::new(app).unwrap();

        let mut alice = create_request("alice");
        alice.first_name = "Alice".to_string();
        alice.last_name = "Karimova".to_string();
        create_via_api(&server, &alice).await;
        let mut alina = create_request("alina");
        alina.first_name = "Alina".to_string();
        alina.last_name = "Tosheva".to_string();
        create_via_api(&server, &alina).await;

        let (name, value) = admin_auth();
        let response = server
            .get("/api/v1/users")
            .add_query_param("search", "ali, karim")
            .add_header(name, value)
            .await;

        let body: ApiResponse<Value> = response.json();
        let results = body.data["results"].as_array().unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0]["full_name"], "Alice Karimova");
    }

    #[tokio::test]
    async fn test_search_treats_wildcards_literally() {
        let app = setup_test_app().await;
        let server = TestServer::new(app).unwrap();
        create_via_api(&server, &create_request("snake_case")).await;

        let (name, value) = admin_auth();
        for (term, expected) in [("_", vec!["snake_case"]), ("%", vec![]), ("a_m", vec![])] {
            let response = server
                .get("/api/v1/users")
                .add_query_param("search", term)
                .add_header(name.clone(), value.clone())
                .await;
            response.assert_status(StatusCode::OK);
            let body: ApiResponse<Value> = response.json();
            let names: Vec<&str> = body.data["results"]
                .as_array()
                .unwrap()
                .iter()
                .map(|item| item["username"].as_str().unwrap())
                .collect();
            assert_eq!(names, expected, "search {:?}", term);
        }
    }

    #[tokio::test]
    async fn test_staff_filter_accepts_numeric_and_capitalized_flags() {
        let app = setup_test_app().await;
        let server = TestServer::new(app).unwrap();
        let (name, value) = admin_auth();

        for (raw, expected) in [("1", "admin"), ("True", "admin"), ("0", "member"), ("false", "member")] {
            let response = server
                .get("/api/v1/users")
                .add_query_param("is_staff", raw)
                .add_header(name.clone(), value.clone())
                .await;
            response.assert_status(StatusCode::OK);
            let body: ApiResponse<Value> = response.json();
            assert_eq!(body.data["count"], 1, "is_staff={}", raw);
            assert_eq!(body.data["results"][0]["username"], expected);
        }

        let response = server
            .get("/api/v1/users")
            .add_query_param("is_staff", "maybe")
            .add_header(name, value)
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
        assert!(!response.json::<ErrorResponse>().success);
    }

    #[tokio::test]
    async fn test_missing_password_is_a_field_error() {
        let app = setup_test_app().await;
        let server = TestServer::new(app).unwrap();

        let (name, value) = admin_auth();
        let response = server
            .post("/api/v1/users")
            .add_header(name, value)
            .json(&json!({ "username": "nopw" }))
            .await;

        response.assert_status(StatusCode::BAD_REQUEST);
        let body: ErrorResponse = response.json();
        assert_eq!(body.code, "VALIDATION_ERROR");
        assert_eq!(body.fields.unwrap()["password"], vec!["This field is required.".to_string()]);
    }

    #[tokio::test]
    async fn test_malformed_requests_use_error_envelope() {
        let app = setup_test_app().await;
        let server = TestServer::new(app).unwrap();
        let (name, value) = admin_auth();

        let response = server
            .get("/api/v1/users")
            .add_query_param("page", 0)
            .add_header(name.clone(), value.clone())
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
        let body: ErrorResponse = response.json();
        assert_eq!(body.code, "VALIDATION_ERROR");
        assert!(body.fields.unwrap().contains_key("page"));

        let response = server
            .post("/api/v1/users")
            .add_header(name.clone(), value.clone())
            .add_header(header::CONTENT_TYPE, "application/json".parse::<axum::http::HeaderValue>().unwrap())
            .bytes("{not json".into())
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
        assert_eq!(response.json::<ErrorResponse>().code, "BAD_REQUEST");

        let response = server.get("/api/v1/users/abc").add_header(name, value).await;
        response.assert_status(StatusCode::BAD_REQUEST);
        assert!(!response.json::<ErrorResponse>().success);
    }

    #[tokio::test]
    async fn test_ordering_filter_and_pagination() {
        let app = setup_test_app().await;
        let server = TestServer::new(app).unwrap();

        for username in ["carol", "bob", "dave"] {
            create_via_api(&server, &create_request(username)).await;
        }

        let (name, value) = admin_auth();
        let response = server
            .get("/api/v1/users")
            .add_query_param("ordering", "username")
            .add_query_param("page_size", 2)
            .add_query_param("page", 2)
            .add_header(name.clone(), value.clone())
            .await;
        response.assert_status(StatusCode::OK);
        let body: ApiResponse<Value> = response.json();
        assert_eq!(body.data["count"], 5);
        assert_eq!(body.data["total_pages"], 3);
        let names: Vec<&str> = body.data["results"]
            .as_array()
            .unwrap()
            .iter()
            .map(|item| item["username"].as_str().unwrap())
            .collect();
        // admin, bob | carol, dave | member
        assert_eq!(names, vec!["carol", "dave"]);

        let response = server
            .get("/api/v1/users")
            .add_query_param("is_staff", true)
            .add_header(name.clone(), value.clone())
            .await;
        let body: ApiResponse<Value> = response.json();
        assert_eq!(body.data["count"], 1);
        assert_eq!(body.data["results"][0]["username"], "admin");

        let response = server
            .get("/api/v1/users")
            .add_query_param("page_size", 500)
            .add_header(name, value)
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_get_and_delete_user() {
        let app = setup_test_app().await;
        let server = TestServer::new(app).unwrap();

        let created = create_via_api(&server, &create_request("goner")).await;
        let id = created["id"].as_i64().unwrap();
        let (name, value) = admin_auth();

        server
            .get(&format!("/api/v1/users/{}", id))
            .add_header(name.clone(), value.clone())
            .await
            .assert_status(StatusCode::OK);

        let response = server
            .delete(&format!("/api/v1/users/{}", id))
            .add_header(name.clone(), value.clone())
            .await;
        response.assert_status(StatusCode::OK);
        let body: ApiResponse<String> = response.json();
        assert_eq!(body.message, "User deleted successfully");

        server
            .get(&format!("/api/v1/users/{}", id))
            .add_header(name.clone(), value.clone())
            .await
            .assert_status(StatusCode::NOT_FOUND);
        server
            .delete(&format!("/api/v1/users/{}", id))
            .add_header(name, value)
            .await
            .assert_status(StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_profile_photo_upload_serve_and_clear() {
        let app = setup_test_app().await;
        let server = TestServer::new(app).unwrap();

        let created = create_via_api(&server, &create_request("photogenic")).await;
        let id = created["id"].as_i64().unwrap();
        assert!(created["profile_photo"].is_null());

        let (name, value) = admin_auth();
        let form = MultipartForm::new().add_part(
            "file",
            Part::bytes(PNG_BYTES.to_vec()).file_name("me.png").mime_type("image/png"),
        );
        let response = server
            .put(&format!("/api/v1/users/{}/profile-photo", id))
            .add_header(name.clone(), value.clone())
            .multipart(form)
            .await;
        response.assert_status(StatusCode::OK);
        let body: ApiResponse<Value> = response.json();
        let url = body.data["profile_photo"].as_str().unwrap().to_string();
        assert!(url.starts_with(&format!("/media/profile_photos/{}_", id)));
        assert!(url.ends_with(".png"));

        let served = server.get(&url).await;
        served.assert_status(StatusCode::OK);
        assert_eq!(served.as_bytes().as_ref(), &PNG_BYTES[..]);

        let response = server
            .delete(&format!("/api/v1/users/{}/profile-photo", id))
            .add_header(name, value)
            .await;
        response.assert_status(StatusCode::OK);
        let body: ApiResponse<Value> = response.json();
        assert!(body.data["profile_photo"].is_null());

        server.get(&url).await.assert_status(StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_profile_photo_rejects_non_image() {
        let app = setup_test_app().await;
        let server = TestServer::new(app).unwrap();

        let created = create_via_api(&server, &create_request("scribe")).await;
        let id = created["id"].as_i64().unwrap();

        let (name, value) = admin_auth();
        let form = MultipartForm::new().add_part(
            "file",
            Part::bytes(b"%PDF-1.7 definitely not an image".to_vec()).file_name("cv.pdf"),
        );
        let response = server
            .put(&format!("/api/v1/users/{}/profile-photo", id))
            .add_header(name.clone(), value.clone())
            .multipart(form)
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
        assert!(response.json::<ErrorResponse>().fields.unwrap().contains_key("profile_photo"));

        let response = server
            .put(&format!("/api/v1/users/{}/profile-photo", id))
            .add_header(name, value)
            .multipart(MultipartForm::new().add_text("note", "no file here"))
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_admin_requires_staff() {
        let app = setup_test_app().await;
        let server = TestServer::new(app).unwrap();

        server
            .get("/admin/accounts/user/")
            .await
            .assert_status(StatusCode::UNAUTHORIZED);

        let (name, value) = member_auth();
        server
            .get("/admin/accounts/user/")
            .add_header(name, value)
            .await
            .assert_status(StatusCode::FORBIDDEN);

        let (name, value) = admin_auth();
        let response = server.get("/admin/").add_header(name, value).await;
        assert!(response.status_code().is_redirection());
        assert_eq!(response.header(header::LOCATION), "/admin/accounts/user/");
    }

    #[tokio::test]
    async fn test_admin_change_list() {
        let app = setup_test_app().await;
        let server = TestServer::new(app).unwrap();
        let (name, value) = admin_auth();

        let response = server
            .get("/admin/accounts/user/")
            .add_header(name.clone(), value.clone())
            .await;
        response.assert_status(StatusCode::OK);
        let html = response.text();
        assert!(html.contains("Select user to change"));
        assert!(html.contains(">member</a>"));
        assert!(html.contains(">admin</a>"));
        // Placeholder avatars carry the initial; blank names show as "-"
        assert!(html.contains(">M</span>"));
        assert!(html.contains("<td>-</td>"));
        assert!(!html.contains("argon2"));

        let response = server
            .get("/admin/accounts/user/")
            .add_query_param("is_staff", "1")
            .add_header(name.clone(), value.clone())
            .await;
        let html = response.text();
        assert!(html.contains(">admin</a>"));
        assert!(!html.contains(">member</a>"));

        let response = server
            .get("/admin/accounts/user/")
            .add_query_param("q", "memb")
            .add_header(name, value)
            .await;
        let html = response.text();
        assert!(html.contains(">member</a>"));
        assert!(!html.contains(">admin</a>"));
    }

    #[tokio::test]
    async fn test_admin_change_list_paginates() {
        let (app, state) = setup_test_app_with_state().await;
        let server = TestServer::new(app).unwrap();
        for i in 0..30 {
            seed_user(&state.db, &format!("bulk{:02}", i), false).await;
        }
        let (name, value) = admin_auth();

        let html = server
            .get("/admin/accounts/user/")
            .add_query_param("o", "username")
            .add_header(name.clone(), value.clone())
            .await
            .text();
        assert!(html.contains(">bulk00</a>"));
        assert!(!html.contains(">member</a>"));
        assert!(html.contains("Show all"));

        let html = server
            .get("/admin/accounts/user/")
            .add_query_param("o", "username")
            .add_query_param("p", 2)
            .add_header(name.clone(), value.clone())
            .await
            .text();
        assert!(html.contains(">member</a>"));

        let html = server
            .get("/admin/accounts/user/")
            .add_query_param("all", "1")
            .add_header(name, value)
            .await
            .text();
        assert!(html.contains(">bulk00</a>"));
        assert!(html.contains(">member</a>"));
    }

    #[tokio::test]
    async fn test_admin_add_user() {
        let (app, state) = setup_test_app_with_state().await;
        let server = TestServer::new(app).unwrap();
        let (name, value) = admin_auth();

        let response = server
            .get("/admin/accounts/user/add/")
            .add_header(name.clone(), value.clone())
            .await;
        response.assert_status(StatusCode::OK);
        assert!(response.text().contains("name=\"password2\""));

        // Mismatched passwords re-render the form
        let response = server
            .post("/admin/accounts/user/add/")
            .add_header(name.clone(), value.clone())
            .form(&[
                ("username", "newbie"),
                ("email", "newbie@example.com"),
                ("password1", "Velvet-Harbor-93"),
                ("password2", "Velvet-Harbor-39"),
                ("is_active", "on"),
            ])
            .await;
        response.assert_status(StatusCode::OK);
        assert!(response.text().contains("The two password fields didn&#x27;t match."));
        let count = user::Entity::find()
            .filter(user::Column::Username.eq("newbie"))
            .count(&state.db)
            .await
            .unwrap();
        assert_eq!(count, 0);

        let response = server
            .post("/admin/accounts/user/add/")
            .add_header(name, value)
            .form(&[
                ("username", "newbie"),
                ("email", "newbie@example.com"),
                ("password1", "Velvet-Harbor-93"),
                ("password2", "Velvet-Harbor-93"),
                ("is_active", "on"),
                ("is_staff", "on"),
            ])
            .await;
        assert!(response.status_code().is_redirection());

        let created = user::Entity::find()
            .filter(user::Column::Username.eq("newbie"))
            .one(&state.db)
            .await
            .unwrap()
            .unwrap();
        assert!(created.is_staff);
        assert!(!created.is_superuser);
        assert!(verify_password("Velvet-Harbor-93", &created.password));
        assert_eq!(
            response.header(header::LOCATION),
            format!("/admin/accounts/user/{}/change/", created.id).as_str()
        );
    }

    #[tokio::test]
    async fn test_admin_add_requires_email() {
        let app = setup_test_app().await;
        let server = TestServer::new(app).unwrap();
        let (name, value) = admin_auth();

        let response = server
            .post("/admin/accounts/user/add/")
            .add_header(name, value)
            .form(&[
                ("username", "mailless"),
                ("password1", "Velvet-Harbor-93"),
                ("password2", "Velvet-Harbor-93"),
            ])
            .await;
        response.assert_status(StatusCode::OK);
        assert!(response.text().contains("This field is required."));
    }

    #[tokio::test]
    async fn test_admin_change_form_and_submit() {
        let (app, state) = setup_test_app_with_state().await;
        let server = TestServer::new(app).unwrap();
        let (name, value) = admin_auth();
        let target = seed_user(&state.db, "target", false).await;

        let response = server
            .get(&format!("/admin/accounts/user/{}/change/", target.id))
            .add_header(name.clone(), value.clone())
            .await;
        response.assert_status(StatusCode::OK);
        let html = response.text();
        assert!(html.contains(&format!("href=\"/admin/accounts/user/{}/password/\"", target.id)));
        assert!(!html.contains(&target.password));
        assert!(html.contains("Date joined"));

        let response = server
            .post(&format!("/admin/accounts/user/{}/change/", target.id))
            .add_header(name, value)
            .form(&[
                ("username", "target"),
                ("email", "target@example.org"),
                ("first_name", "Tar"),
                ("last_name", "Get"),
                ("phone_number", "+998711112233"),
                ("is_active", "on"),
            ])
            .await;
        assert!(response.status_code().is_redirection());

        let updated = user::Entity::find_by_id(target.id).one(&state.db).await.unwrap().unwrap();
        assert_eq!(updated.email, "target@example.org");
        assert_eq!(updated.full_name(), "Tar Get");
        assert_eq!(updated.phone_number.as_deref(), Some("+998711112233"));
        assert_eq!(updated.password, target.password);
        assert!(updated.updated_by_id.is_some());
    }

    #[tokio::test]
    async fn test_admin_change_allows_blank_email() {
        let (app, state) = setup_test_app_with_state().await;
        let server = TestServer::new(app).unwrap();
        let (name, value) = admin_auth();

        let mut request = create_request("nomail");
        request.email = String::new();
        let created = create_via_api(&server, &request).await;
        let id = created["id"].as_i64().unwrap() as i32;

        // The active box is left unchecked
        let response = server
            .post(&format!("/admin/accounts/user/{}/change/", id))
            .add_header(name, value)
            .form(&[("username", "nomail"), ("email", "")])
            .await;
        assert!(response.status_code().is_redirection());

        let updated = user::Entity::find_by_id(id).one(&state.db).await.unwrap().unwrap();
        assert_eq!(updated.email, "");
        assert!(!updated.is_active);
    }

    #[tokio::test]
    async fn test_admin_add_with_photo() {
        let (app, state) = setup_test_app_with_state().await;
        let server = TestServer::new(app).unwrap();
        let (name, value) = admin_auth();

        let form = MultipartForm::new()
            .add_text("username", "pictured")
            .add_text("email", "pictured@example.com")
            .add_text("password1", "Velvet-Harbor-93")
            .add_text("password2", "Velvet-Harbor-93")
            .add_text("is_active", "on")
            .add_part(
                "profile_photo",
                Part::bytes(PNG_BYTES.to_vec()).file_name("me.png").mime_type("image/png"),
            );
        let response = server
            .post("/admin/accounts/user/add/")
            .add_header(name, value)
            .multipart(form)
            .await;
        assert!(response.status_code().is_redirection());

        let created = user::Entity::find()
            .filter(user::Column::Username.eq("pictured"))
            .one(&state.db)
            .await
            .unwrap()
            .unwrap();
        let photo = created.profile_photo.unwrap();
        assert!(photo.starts_with(&format!("profile_photos/{}_", created.id)));
        assert!(photo.ends_with(".png"));
        assert!(created.is_active);
    }

    #[tokio::test]
    async fn test_admin_add_rejects_non_image_photo() {
        let (app, state) = setup_test_app_with_state().await;
        let server = TestServer::new(app).unwrap();
        let (name, value) = admin_auth();

        let form = MultipartForm::new()
            .add_text("username", "pdfer")
            .add_text("email", "pdfer@example.com")
            .add_text("password1", "Velvet-Harbor-93")
            .add_text("password2", "Velvet-Harbor-93")
            .add_part("profile_photo", Part::bytes(b"%PDF-1.7".to_vec()).file_name("cv.pdf"));
        let response = server
            .post("/admin/accounts/user/add/")
            .add_header(name, value)
            .multipart(form)
            .await;
        response.assert_status(StatusCode::OK);
        assert!(response.text().contains("Upload a valid image."));

        let count = user::Entity::find()
            .filter(user::Column::Username.eq("pdfer"))
            .count(&state.db)
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_admin_change_replaces_photo() {
        let (app, state) = setup_test_app_with_state().await;
        let server = TestServer::new(app).unwrap();
        let (name, value) = admin_auth();
        let target = seed_user(&state.db, "snapshot", false).await;

        let form = MultipartForm::new()
            .add_text("username", "snapshot")
            .add_text("email", "snapshot@example.com")
            .add_text("is_active", "on")
            .add_part(
                "profile_photo",
                Part::bytes(PNG_BYTES.to_vec()).file_name("new.png").mime_type("image/png"),
            );
        let response = server
            .post(&format!("/admin/accounts/user/{}/change/", target.id))
            .add_header(name.clone(), value.clone())
            .multipart(form)
            .await;
        assert!(response.status_code().is_redirection());

        let updated = user::Entity::find_by_id(target.id).one(&state.db).await.unwrap().unwrap();
        let photo = updated.profile_photo.clone().unwrap();
        server
            .get(&format!("/media/{}", photo))
            .await
            .assert_status(StatusCode::OK);

        // The change list now shows a thumbnail instead of the initial
        let html = server
            .get("/admin/accounts/user/")
            .add_header(name, value)
            .await
            .text();
        assert!(html.contains(&format!("src=\"/media/{}\"", photo)));
    }

    #[tokio::test]
    async fn test_admin_password_change() {
        let (app, state) = setup_test_app_with_state().await;
        let server = TestServer::new(app).unwrap();
        let (name, value) = admin_auth();
        let target = seed_user(&state.db, "forgetful", false).await;
        let url = format!("/admin/accounts/user/{}/password/", target.id);

        let response = server.get(&url).add_header(name.clone(), value.clone()).await;
        response.assert_status(StatusCode::OK);
        assert!(response.text().contains("forgetful"));

        let response = server
            .post(&url)
            .add_header(name.clone(), value.clone())
            .form(&[("password1", "12345678"), ("password2", "12345678")])
            .await;
        response.assert_status(StatusCode::OK);
        assert!(response.text().contains("This password is entirely numeric."));

        let response = server
            .post(&url)
            .add_header(name, value)
            .form(&[("password1", "Copper-Lantern-71"), ("password2", "Copper-Lantern-71")])
            .await;
        assert!(response.status_code().is_redirection());

        let updated = user::Entity::find_by_id(target.id).one(&state.db).await.unwrap().unwrap();
        assert!(verify_password("Copper-Lantern-71", &updated.password));
    }

    #[tokio::test]
    async fn test_admin_delete() {
        let (app, state) = setup_test_app_with_state().await;
        let server = TestServer::new(app).unwrap();
        let (name, value) = admin_auth();
        let target = seed_user(&state.db, "leaving", false).await;

        let response = server
            .post(&format!("/admin/accounts/user/{}/delete/", target.id))
            .add_header(name, value)
            .await;
        assert!(response.status_code().is_redirection());
        assert_eq!(response.header(header::LOCATION), "/admin/accounts/user/");
        assert!(user::Entity::find_by_id(target.id).one(&state.db).await.unwrap().is_none());
    }
}
