use actix_web::{web, HttpResponse, Result};

use crate::error::WencaiError;
use crate::models::{ApiResponse, QueryData};
use crate::services::wencai::{QueryRequest, QueryResult};
use crate::state::AppState;

/// 即时问财查询
///
/// 请求里没带 cookie / user_agent 时使用配置中的值。
pub async fn query(
    state: web::Data<AppState>,
    body: web::Json<QueryRequest>,
) -> Result<HttpResponse> {
    let mut req = body.into_inner();
    let settings = state.fetcher.settings();
    if req.cookie.trim().is_empty() {
        req.cookie = settings.cookie.clone();
    }
    if req.user_agent.is_none() && !settings.user_agent.is_empty() {
        req.user_agent = Some(settings.user_agent.clone());
    }

    let cancel = state.shutdown.child_token();
    match state.fetcher.client().get(&req, &cancel).await {
        Ok(result) => {
            let data = match result {
                QueryResult::Records(paged) => QueryData {
                    records: Some(paged.records),
                    pages: Some(paged.pages),
                    error: paged.error.map(|e| e.to_string()),
                    ..Default::default()
                },
                QueryResult::Answer(answer) => QueryData {
                    answer: Some(answer),
                    ..Default::default()
                },
                QueryResult::Empty => QueryData::default(),
            };
            Ok(HttpResponse::Ok().json(ApiResponse::success(data)))
        }
        Err(e @ WencaiError::Validation(_)) => {
            let response = ApiResponse::<QueryData>::error(e.to_string());
            Ok(HttpResponse::BadRequest().json(response))
        }
        Err(e) => {
            let response = ApiResponse::<QueryData>::error(e.to_string());
            // 上游不可达和本地错误分开
            Ok(match e.root() {
                WencaiError::Transport(_) => HttpResponse::BadGateway().json(response),
                _ => HttpResponse::InternalServerError().json(response),
            })
        }
    }
}

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.route("/wencai/query", web::post().to(query));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::wencai::Endpoints;
    use actix_web::{test, App};
    use serde_json::{json, Value};
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn endpoints(server: &MockServer) -> Endpoints {
        Endpoints {
            robot_data: format!("{}/robot", server.uri()),
            data_list: format!("{}/list", server.uri()),
            find: format!("{}/find", server.uri()),
        }
    }

    /// 测试非表格答案，且缺省 cookie 取配置值
    #[actix_web::test]
    async fn test_query_returns_answer_with_default_cookie() {
        let server = MockServer::start().await;
        let content = json!({"components": [{
            "show_type": "txt",
            "title_config": {"data": {"h1": "结论"}},
            "data": {"content": "上涨"}
        }]});
        Mock::given(method("POST"))
            .and(path("/robot"))
            .and(header("cookie", "v=default"))
            .respond_with(ResponseTemplate::new(200).set_body_json(
                json!({"data": {"answer": [{"txt": [{"content": content}]}]}}),
            ))
            .mount(&server)
            .await;

        let state = AppState::for_tests(endpoints(&server));
        let app = test::init_service(
            App::new().app_data(web::Data::new(state)).configure(config),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/wencai/query")
            .set_json(json!({"query": "大盘走势"}))
            .to_request();
        let resp: Value = test::call_and_read_body_json(&app, req).await;

        assert_eq!(resp["success"], true);
        assert!(resp["data"]["answer"].is_object());
        assert!(resp["data"].get("records").is_none());
    }

    #[actix_web::test]
    async fn test_query_requires_question() {
        let server = MockServer::start().await;
        let state = AppState::for_tests(endpoints(&server));
        let app = test::init_service(
            App::new().app_data(web::Data::new(state)).configure(config),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/wencai/query")
            .set_json(json!({"query": "  "}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 400);
    }

    #[actix_web::test]
    async fn test_upstream_failure_is_bad_gateway() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/robot"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let state = AppState::for_tests(endpoints(&server));
        let app = test::init_service(
            App::new().app_data(web::Data::new(state)).configure(config),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/wencai/query")
            .set_json(json!({"query": "涨停", "retry": 1}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 502);
    }

    /// 翻页中途失败：返回已获取的数据和错误信息
    #[actix_web::test]
    async fn test_query_returns_partial_records() {
        let server = MockServer::start().await;
        let content = json!({"components": [{
            "show_type": "xuangu_tableV1",
            "data": {"meta": {"extra": {"condition": "c", "row_count": 3}}},
            "config": {"other_info": {"footer_info": {"url": "/x?condition=c"}}}
        }]});
        Mock::given(method("POST"))
            .and(path("/robot"))
            .respond_with(ResponseTemplate::new(200).set_body_json(
                json!({"data": {"answer": [{"txt": [{"content": content}]}]}}),
            ))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/list"))
            .and(wiremock::matchers::body_string_contains("&page=1&"))
            .respond_with(ResponseTemplate::new(200).set_body_json(
                json!({"answer": {"components": [{"data": {"datas": [{"code": "A"}, {"code": "B"}]}}]}}),
            ))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/list"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let state = AppState::for_tests(endpoints(&server));
        let app = test::init_service(
            App::new().app_data(web::Data::new(state)).configure(config),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/wencai/query")
            .set_json(json!({"query": "涨停", "loop": true, "per_page": 2, "retry": 1}))
            .to_request();
        let resp: Value = test::call_and_read_body_json(&app, req).await;

        assert_eq!(resp["success"], true);
        assert_eq!(resp["data"]["records"].as_array().unwrap().len(), 2);
        assert_eq!(resp["data"]["pages"], 1);
        assert!(resp["data"]["error"].as_str().unwrap().contains('2'));
    }
}
