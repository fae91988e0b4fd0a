//! 已入库数据的查询接口

use actix_web::{web, HttpResponse, Result};
use chrono::NaiveDate;
use serde::Deserialize;

use crate::error::PersistenceError;
use crate::models::{ApiResponse, MarketStatistics, PageData, Stock, ZtInfo};
use crate::state::AppState;
use crate::storage::{Entity, ListFilter, NaturalKey, Repository};

const MAX_PAGE_SIZE: u32 = 100;
const MAX_LATEST_LIMIT: u32 = 200;

/// 列表查询参数
#[derive(Debug, Deserialize)]
pub struct RecordQuery {
    pub code: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

impl RecordQuery {
    fn page(&self) -> u32 {
        self.page.unwrap_or(1).max(1)
    }

    fn page_size(&self) -> u32 {
        self.page_size.unwrap_or(20).clamp(1, MAX_PAGE_SIZE)
    }

    fn filter(&self) -> ListFilter {
        ListFilter {
            code: self.code.clone(),
            start_date: self.start_date,
            end_date: self.end_date,
            limit: self.page_size(),
            offset: (self.page() - 1).saturating_mul(self.page_size()),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct LatestQuery {
    pub limit: Option<u32>,
}

async fn page_of<E: Entity>(
    repo: &Repository<E>,
    query: &RecordQuery,
) -> Result<PageData<E>, PersistenceError> {
    let filter = query.filter();
    let total = repo.count(&filter).await?;
    let items = repo.list(&filter).await?;
    Ok(PageData {
        items,
        total,
        page: query.page(),
        page_size: query.page_size(),
    })
}

fn page_response<E: serde::Serialize>(
    result: Result<PageData<E>, PersistenceError>,
) -> HttpResponse {
    match result {
        Ok(page) => HttpResponse::Ok().json(ApiResponse::success(page)),
        Err(e) => HttpResponse::InternalServerError()
            .json(ApiResponse::<PageData<E>>::error(e.to_string())),
    }
}

/// 竞价选股数据分页
pub async fn list_stocks(
    state: web::Data<AppState>,
    query: web::Query<RecordQuery>,
) -> Result<HttpResponse> {
    Ok(page_response(page_of(&state.stocks, &query).await))
}

/// 最近的竞价选股数据
pub async fn latest_stocks(
    state: web::Data<AppState>,
    query: web::Query<LatestQuery>,
) -> Result<HttpResponse> {
    let filter = ListFilter {
        limit: query.limit.unwrap_or(50).clamp(1, MAX_LATEST_LIMIT),
        ..Default::default()
    };

    match state.stocks.list(&filter).await {
        Ok(stocks) => Ok(HttpResponse::Ok().json(ApiResponse::success(stocks))),
        Err(e) => {
            let response = ApiResponse::<Vec<Stock>>::error(e.to_string());
            Ok(HttpResponse::InternalServerError().json(response))
        }
    }
}

/// 涨停数据分页
pub async fn list_zt(
    state: web::Data<AppState>,
    query: web::Query<RecordQuery>,
) -> Result<HttpResponse> {
    Ok(page_response::<ZtInfo>(page_of(&state.zt, &query).await))
}

/// 市场统计分页
pub async fn list_market_statistics(
    state: web::Data<AppState>,
    query: web::Query<RecordQuery>,
) -> Result<HttpResponse> {
    Ok(page_response::<MarketStatistics>(
        page_of(&state.statistics, &query).await,
    ))
}

/// 某个交易日的市场统计
pub async fn get_market_statistics(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse> {
    let raw = path.into_inner();
    let Ok(trade_date) = NaiveDate::parse_from_str(&raw, "%Y-%m-%d") else {
        let response = ApiResponse::<MarketStatistics>::error(format!("无效的交易日: {}", raw));
        return Ok(HttpResponse::BadRequest().json(response));
    };
    let key = NaturalKey::new(MarketStatistics::MARKET, trade_date);

    match state.statistics.find_by_key(&key).await {
        Ok(Some(stats)) => Ok(HttpResponse::Ok().json(ApiResponse::success(stats))),
        Ok(None) => {
            let response = ApiResponse::<MarketStatistics>::error(format!(
                "{} 没有市场统计",
                key.trade_date
            ));
            Ok(HttpResponse::NotFound().json(response))
        }
        Err(e) => {
            let response = ApiResponse::<MarketStatistics>::error(e.to_string());
            Ok(HttpResponse::InternalServerError().json(response))
        }
    }
}

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/stocks")
            .route("", web::get().to(list_stocks))
            .route("/latest", web::get().to(latest_stocks)),
    )
    .route("/zt", web::get().to(list_zt))
    .service(
        web::scope("/market_statistics")
            .route("", web::get().to(list_market_statistics))
            .route("/{trade_date}", web::get().to(get_market_statistics)),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::wencai::Endpoints;
    use actix_web::{test as actix_test, App};
    use serde_json::Value;

    fn statistics(day: u32, limit_up: i32) -> MarketStatistics {
        MarketStatistics {
            id: None,
            code: MarketStatistics::MARKET.to_string(),
            limit_up_count: limit_up,
            limit_down_count: 1,
            broken_count: 2,
            max_consecutive_days: 3,
            two_consecutive_count: 4,
            trade_date: NaiveDate::from_ymd_opt(2024, 5, day).unwrap(),
        }
    }

    #[test]
    fn test_page_size_is_clamped() {
        let query = RecordQuery {
            code: None,
            start_date: None,
            end_date: None,
            page: Some(3),
            page_size: Some(1000),
        };
        let filter = query.filter();
        assert_eq!(filter.limit, 100);
        assert_eq!(filter.offset, 200);

        let query = RecordQuery {
            page: Some(0),
            page_size: Some(0),
            ..query
        };
        let filter = query.filter();
        assert_eq!(filter.limit, 1);
        assert_eq!(filter.offset, 0);
    }

    /// 测试按日期区间过滤和分页
    #[actix_web::test]
    async fn test_market_statistics_by_date_range() {
        let state = AppState::for_tests(Endpoints::default());
        state
            .statistics
            .batch_save((1..=6).map(|day| statistics(day, day as i32 * 10)).collect())
            .await
            .unwrap();

        let app = actix_test::init_service(
            App::new().app_data(web::Data::new(state)).configure(config),
        )
        .await;

        let req = actix_test::TestRequest::get()
            .uri("/market_statistics?start_date=2024-05-02&end_date=2024-05-05&page_size=3")
            .to_request();
        let resp: Value = actix_test::call_and_read_body_json(&app, req).await;

        assert_eq!(resp["success"], true);
        assert_eq!(resp["data"]["total"], 4);
        let items = resp["data"]["items"].as_array().unwrap();
        assert_eq!(items.len(), 3);
        assert_eq!(items[0]["trade_date"], "2024-05-05");
        assert_eq!(items[0]["limit_up_count"], 50);

        let req = actix_test::TestRequest::get()
            .uri("/market_statistics/2024-05-03")
            .to_request();
        let resp: Value = actix_test::call_and_read_body_json(&app, req).await;
        assert_eq!(resp["data"]["limit_up_count"], 30);

        let req = actix_test::TestRequest::get()
            .uri("/market_statistics/2024-06-01")
            .to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(resp.status(), 404);
    }

    #[actix_web::test]
    async fn test_empty_stock_lists() {
        let state = AppState::for_tests(Endpoints::default());
        let app = actix_test::init_service(
            App::new().app_data(web::Data::new(state)).configure(config),
        )
        .await;

        let req = actix_test::TestRequest::get().uri("/stocks?code=000001.SZ").to_request();
        let resp: Value = actix_test::call_and_read_body_json(&app, req).await;
        assert_eq!(resp["data"]["total"], 0);
        assert_eq!(resp["data"]["page"], 1);
        assert_eq!(resp["data"]["page_size"], 20);

        let req = actix_test::TestRequest::get().uri("/stocks/latest?limit=5").to_request();
        let resp: Value = actix_test::call_and_read_body_json(&app, req).await;
        assert_eq!(resp["data"], serde_json::json!([]));

        let req = actix_test::TestRequest::get().uri("/zt?start_date=bad").to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(resp.status(), 400);
    }
}
