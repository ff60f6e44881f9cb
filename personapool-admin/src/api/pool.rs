use personapool_common::PoolError;
use personapool_core::Services;
use poem::web::Data;
use poem_openapi::payload::Json;
use poem_openapi::{ApiResponse, Object, OpenApi};

pub struct Api;

#[derive(Object)]
struct PoolStats {
    total: usize,
    idle: usize,
    borrowed: usize,
    cooldown: usize,
    session_required: usize,
    suspended: usize,
    health_min: i32,
    health_avg: f64,
    health_max: i32,
}

#[derive(ApiResponse)]
enum GetPoolStatsResponse {
    #[oai(status = 200)]
    Ok(Json<PoolStats>),
}

#[OpenApi]
impl Api {
    #[oai(path = "/pool/stats", method = "get", operation_id = "get_pool_stats")]
    async fn get_pool_stats(
        &self,
        services: Data<&Services>,
    ) -> Result<GetPoolStatsResponse, PoolError> {
        let stats = services.pool.lock().await.stats();
        Ok(GetPoolStatsResponse::Ok(Json(PoolStats {
            total: stats.total,
            idle: stats.idle,
            borrowed: stats.borrowed,
            cooldown: stats.cooldown,
            session_required: stats.session_required,
            suspended: stats.suspended,
            health_min: stats.health_min,
            health_avg: stats.health_avg,
            health_max: stats.health_max,
        })))
    }
}
