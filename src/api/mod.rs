use rocket::{http::Status, serde::json::Json, Catcher, Request, Route};

use crate::error::ErrorBody;

mod elections;
mod votes;

pub fn routes() -> Vec<Route> {
    let mut routes = Vec::new();
    routes.extend(elections::routes());
    routes.extend(votes::routes());
    routes
}

pub fn catchers() -> Vec<Catcher> {
    catchers![default_catcher]
}

/// Give unrouted and unparsable requests the same `{code, message}` body as every other error.
#[catch(default)]
fn default_catcher(status: Status, _req: &Request) -> (Status, Json<ErrorBody>) {
    let reason = status.reason().unwrap_or("Error");
    let code = reason.to_lowercase().replace(' ', "_");
    (status, Json(ErrorBody::new(&code, reason)))
}
