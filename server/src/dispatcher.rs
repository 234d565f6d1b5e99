use privd_core::Broker;
use privd_protocol::BrokerError;
use privd_protocol::Request;
use privd_protocol::Response;
use tracing::debug;
use tracing::warn;

/// Fixed payload of the `VERSION` command.
pub const SERVER_VERSION: &str = concat!("privd ", env!("CARGO_PKG_VERSION"));

/// Processes one line from an authenticated session and produces the
/// single-line response. Every failure, including unexpected store errors, is
/// converted to a structured failure here; nothing escapes to the worker
/// except through the returned value.
pub async fn dispatch(broker: &Broker, identity: &str, line: &str) -> Response {
    match Request::parse(line) {
        Request::Ping => Response::ok("PONG"),
        Request::Version => Response::ok(SERVER_VERSION),
        Request::Exec(command) => exec(broker, identity, &command).await,
        Request::CheckAuth(package) => check_auth(broker, &package),
        Request::Grant(package) => grant(broker, &package),
        Request::Revoke(package) => revoke(broker, &package),
        Request::Unknown(line) => {
            debug!("unknown command from {identity:?}: {line:?}");
            Response::fail(format!("Unknown command: {line}"))
        }
    }
}

async fn exec(broker: &Broker, identity: &str, command: &str) -> Response {
    debug!("executing for {identity:?}: {command:?}");
    let result = broker.executor().execute_elevated(command).await;
    if result.success {
        Response::ok(result.stdout)
    } else {
        Response::fail(result.error_message())
    }
}

fn check_auth(broker: &Broker, package: &str) -> Response {
    match broker.packages().uid_for(package) {
        Some(uid) => Response::ok(broker.store().is_granted(package, uid).to_string()),
        None => Response::from_error(&BrokerError::PackageNotFound(package.to_string())),
    }
}

fn grant(broker: &Broker, package: &str) -> Response {
    let Some(uid) = broker.packages().uid_for(package) else {
        return Response::from_error(&BrokerError::PackageNotFound(package.to_string()));
    };
    match broker.store().grant(package, uid, false) {
        Ok(()) => Response::ok(format!("Granted permission to {package}")),
        Err(err) => {
            warn!("grant for {package:?} failed: {err}");
            Response::from_error(&BrokerError::Internal(err.to_string()))
        }
    }
}

fn revoke(broker: &Broker, package: &str) -> Response {
    let Some(uid) = broker.packages().uid_for(package) else {
        return Response::from_error(&BrokerError::PackageNotFound(package.to_string()));
    };
    match broker.store().revoke(package, uid) {
        Ok(()) => Response::ok(format!("Revoked permission from {package}")),
        Err(err) => {
            warn!("revoke for {package:?} failed: {err}");
            Response::from_error(&BrokerError::Internal(err.to_string()))
        }
    }
}
