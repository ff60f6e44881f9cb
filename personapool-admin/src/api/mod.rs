use poem_openapi::OpenApi;

pub mod personas;
pub mod pool;

pub fn get() -> impl OpenApi {
    (personas::ListApi, personas::DetailApi, pool::Api)
}
