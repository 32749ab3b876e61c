use std::collections::HashMap;
use std::sync::Arc;

use saathi_auth::token::bearer;
use warp::{Filter, Rejection, Reply};

use crate::connection::client_connection;
use crate::State;

/// Credential from `?token=`, else from an `Authorization: Bearer` header.
fn handshake_token(query: &HashMap<String, String>, authorization: Option<&str>) -> Option<String> {
    query
        .get("token")
        .map(|token| token.trim())
        .filter(|token| !token.is_empty())
        .or_else(|| authorization.and_then(bearer))
        .map(str::to_string)
}

pub fn routes(state: Arc<State>) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let with_state = warp::any().map(move || state.clone());

    let healthz = warp::path!("healthz").and(warp::get()).map(|| "ok");

    let ws = warp::path!("ws")
        .and(warp::ws())
        .and(warp::query::<HashMap<String, String>>())
        .and(warp::header::optional::<String>("authorization"))
        .and(with_state)
        .map(
            |ws: warp::ws::Ws,
             query: HashMap<String, String>,
             authorization: Option<String>,
             state: Arc<State>| {
                let token = handshake_token(&query, authorization.as_deref());
                ws.on_upgrade(move |socket| client_connection(socket, token, state))
            },
        );

    healthz
        .or(ws)
        .with(warp::cors().allow_any_origin())
        .with(warp::log("saathi_relay"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use k9::assert_equal;

    #[test]
    fn query_token_wins_over_header() {
        let query = HashMap::from([("token".to_string(), "from-query".to_string())]);
        assert_equal!(
            handshake_token(&query, Some("Bearer from-header")),
            Some("from-query".to_string())
        );
    }

    #[test]
    fn header_is_used_when_query_is_blank() {
        let query = HashMap::from([("token".to_string(), " ".to_string())]);
        assert_equal!(
            handshake_token(&query, Some("Bearer from-header")),
            Some("from-header".to_string())
        );
        assert_equal!(handshake_token(&HashMap::new(), Some("Basic abc")), None);
        assert_equal!(handshake_token(&HashMap::new(), None), None);
    }
}
