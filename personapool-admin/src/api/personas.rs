use chrono::Utc;
use personapool_common::PoolError;
use personapool_core::{insert_persona, Services};
use personapool_db_entities::Persona::{self, PersonaState};
use poem::web::Data;
use poem_openapi::param::Path;
use poem_openapi::payload::Json;
use poem_openapi::{ApiResponse, Object, OpenApi};
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter, QueryOrder, Set};
use tracing::*;

pub struct ListApi;
pub struct DetailApi;

#[derive(Object)]
struct CreatePersonaRequest {
    fingerprint: String,
}

#[derive(ApiResponse)]
enum ListPersonasResponse {
    #[oai(status = 200)]
    Ok(Json<Vec<Persona::Model>>),
}

#[derive(ApiResponse)]
enum CreatePersonaResponse {
    #[oai(status = 201)]
    Created(Json<Persona::Model>),
    #[oai(status = 400)]
    BadRequest,
    #[oai(status = 409)]
    Conflict,
}

#[derive(ApiResponse)]
enum BlockPersonaResponse {
    #[oai(status = 200)]
    Ok,
    #[oai(status = 404)]
    NotFound,
}

#[derive(ApiResponse)]
enum RestorePersonaResponse {
    #[oai(status = 200)]
    Ok,
    #[oai(status = 404)]
    NotFound,
    #[oai(status = 409)]
    NotEligible,
}

#[derive(ApiResponse)]
enum SuspendPersonaResponse {
    #[oai(status = 200)]
    Ok,
    #[oai(status = 404)]
    NotFound,
}

#[OpenApi]
impl ListApi {
    #[oai(path = "/personas", method = "get", operation_id = "list_personas")]
    async fn list_personas(
        &self,
        services: Data<&Services>,
    ) -> Result<ListPersonasResponse, PoolError> {
        let db = services.db.lock().await;
        let personas = Persona::Entity::find()
            .order_by_asc(Persona::Column::Id)
            .all(&*db)
            .await?;
        Ok(ListPersonasResponse::Ok(Json(personas)))
    }

    #[oai(path = "/personas", method = "post", operation_id = "create_persona")]
    async fn create_persona(
        &self,
        services: Data<&Services>,
        body: Json<CreatePersonaRequest>,
    ) -> Result<CreatePersonaResponse, PoolError> {
        let fingerprint = body.fingerprint.trim().to_owned();
        if fingerprint.is_empty() {
            return Ok(CreatePersonaResponse::BadRequest);
        }

        let model = {
            let db = services.db.lock().await;
            let existing = Persona::Entity::find()
                .filter(Persona::Column::Fingerprint.eq(&fingerprint))
                .one(&*db)
                .await?;
            if existing.is_some() {
                return Ok(CreatePersonaResponse::Conflict);
            }
            insert_persona(&db, fingerprint).await?
        };

        services
            .pool
            .lock()
            .await
            .insert(model.id, model.fingerprint.clone(), model.health_score);

        info!(persona_id = %model.id, "Persona created");
        Ok(CreatePersonaResponse::Created(Json(model)))
    }
}

#[OpenApi]
impl DetailApi {
    /// Terminal operator action: the persona leaves the pool and is marked
    /// Blocked in the durable store.
    #[oai(path = "/personas/:id/block", method = "post", operation_id = "block_persona")]
    async fn block_persona(
        &self,
        services: Data<&Services>,
        id: Path<i64>,
    ) -> Result<BlockPersonaResponse, PoolError> {
        {
            let db = services.db.lock().await;
            let Some(_) = Persona::Entity::find_by_id(id.0).one(&*db).await? else {
                return Ok(BlockPersonaResponse::NotFound);
            };

            Persona::Entity::update_many()
                .set(Persona::ActiveModel {
                    state: Set(PersonaState::Blocked),
                    updated_at: Set(Utc::now()),
                    ..Default::default()
                })
                .filter(Persona::Column::Id.eq(id.0))
                .exec(&*db)
                .await?;
        }

        services.pool.lock().await.evict(id.0);
        warn!(persona_id = %id.0, "Persona blocked by operator");
        Ok(BlockPersonaResponse::Ok)
    }

    /// Time-gated restore of a suspended persona back into circulation.
    /// Personas that dropped out of the working set (e.g. suspended before
    /// the last restart) are re-admitted from their durable record.
    #[oai(
        path = "/personas/:id/restore",
        method = "post",
        operation_id = "restore_persona"
    )]
    async fn restore_persona(
        &self,
        services: Data<&Services>,
        id: Path<i64>,
    ) -> Result<RestorePersonaResponse, PoolError> {
        let now = Utc::now();
        match services.pool.lock().await.restore(id.0, now) {
            Ok(()) => {}
            Err(PoolError::PersonaNotFound(_)) => {
                let record = {
                    let db = services.db.lock().await;
                    Persona::Entity::find_by_id(id.0).one(&*db).await?
                };
                let Some(record) = record else {
                    return Ok(RestorePersonaResponse::NotFound);
                };

                let (min_suspension, restore_health, threshold) = {
                    let config = services.config.lock().await;
                    (
                        config.store.pool.min_suspension,
                        config.store.pool.restore_health,
                        config.store.pool.suspension_threshold,
                    )
                };
                let suspended_long_enough = now - record.updated_at
                    >= chrono::Duration::milliseconds(min_suspension.as_millis() as i64);
                if record.state != PersonaState::Suspended
                    || !suspended_long_enough
                    || record.health_score < threshold
                {
                    return Ok(RestorePersonaResponse::NotEligible);
                }

                services
                    .pool
                    .lock()
                    .await
                    .insert(record.id, record.fingerprint, restore_health);
            }
            Err(PoolError::RestoreNotEligible(_)) => return Ok(RestorePersonaResponse::NotEligible),
            Err(error) => return Err(error),
        }

        let db = services.db.lock().await;
        Persona::Entity::update_many()
            .set(Persona::ActiveModel {
                state: Set(PersonaState::Available),
                updated_at: Set(Utc::now()),
                ..Default::default()
            })
            .filter(Persona::Column::Id.eq(id.0))
            .exec(&*db)
            .await?;

        info!(persona_id = %id.0, "Persona restored by operator");
        Ok(RestorePersonaResponse::Ok)
    }

    /// External hard-ban signal: suspend immediately from any state,
    /// clearing the credential in the same step.
    #[oai(
        path = "/personas/:id/suspend",
        method = "post",
        operation_id = "suspend_persona"
    )]
    async fn suspend_persona(
        &self,
        services: Data<&Services>,
        id: Path<i64>,
    ) -> Result<SuspendPersonaResponse, PoolError> {
        match services
            .pool
            .lock()
            .await
            .suspend_for_rate_limit(id.0, Utc::now())
        {
            Ok(()) => {}
            Err(PoolError::PersonaNotFound(_)) => return Ok(SuspendPersonaResponse::NotFound),
            Err(error) => return Err(error),
        }

        let db = services.db.lock().await;
        Persona::Entity::update_many()
            .set(Persona::ActiveModel {
                state: Set(PersonaState::Suspended),
                updated_at: Set(Utc::now()),
                ..Default::default()
            })
            .filter(Persona::Column::Id.eq(id.0))
            .exec(&*db)
            .await?;

        warn!(persona_id = %id.0, "Persona suspended by external signal");
        Ok(SuspendPersonaResponse::Ok)
    }
}
