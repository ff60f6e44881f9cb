use personapool_core::Services;
use poem::{Endpoint, EndpointExt, Route};
use poem_openapi::OpenApiService;

pub mod api;

pub fn admin_app(services: &Services) -> impl Endpoint {
    let api_service = OpenApiService::new(
        api::get(),
        "PersonaPool Admin API",
        env!("CARGO_PKG_VERSION"),
    )
    .server("/api");
    let ui = api_service.swagger_ui();

    Route::new()
        .nest("/api", api_service)
        .nest("/docs", ui)
        .data(services.clone())
}
