use anyhow::Result;
use log::warn;
use serde_json::{json, Value};

use crate::{
    bundle::{export_page, import_bundle, parse_bundle},
    models::TabContext,
    protocol::{decode_request, encode_response, DigestPeriod, Request, Response},
    AppState,
};

/// Decode one raw message, run it, and encode exactly one reply.
pub async fn handle_message(app: &AppState, raw: Value) -> Value {
    let (request_id, request) = decode_request(raw);
    let response = match request {
        Ok(request) => handle_request(app, request).await,
        Err(err) => {
            warn!("Rejected message: {err:#}");
            Response::error(format!("{err:#}"))
        }
    };

    match encode_response(&response, request_id.clone()) {
        Ok(value) => value,
        Err(err) => {
            let mut fallback = json!({"type": "ERROR", "message": format!("{err:#}")});
            if let (Some(id), Some(map)) = (request_id, fallback.as_object_mut()) {
                map.insert("requestId".into(), id);
            }
            fallback
        }
    }
}

pub async fn handle_request(app: &AppState, request: Request) -> Response {
    match dispatch(app, request).await {
        Ok(response) => response,
        Err(err) => {
            warn!("Request failed: {err:#}");
            Response::error(format!("{err:#}"))
        }
    }
}

async fn dispatch(app: &AppState, request: Request) -> Result<Response> {
    let session = &app.session;
    let response = match request {
        Request::TabActivated {
            url,
            tab_id,
            window_id,
        } => {
            let context = TabContext {
                url: Some(url.clone()),
                window_id,
                tab_id,
            };
            session.tab_activated(&url, context).await;
            Response::Ok
        }
        Request::TabClosed {
            tab_id,
            window_closing,
        } => {
            session.tab_closed(tab_id, window_closing).await;
            Response::Ok
        }
        Request::WindowFocusChanged { focused } => {
            session.window_focus_changed(focused).await;
            Response::Ok
        }
        Request::IdleStateChanged { state } => {
            session.idle_state_changed(state).await;
            Response::Ok
        }
        Request::GetCurrentSession => Response::CurrentSession(session.snapshot().await),
        Request::ActivitySignal => Response::Activity {
            accepted: session.activity_signal().await,
        },
        Request::GetStats { window } => {
            let stats = session.stats(window).await;
            Response::Stats {
                window,
                focus_score: stats.focus_score(),
                stats,
            }
        }
        Request::Pause => Response::PauseState {
            changed: session.pause().await,
            paused: true,
        },
        Request::Resume => Response::PauseState {
            changed: session.resume().await,
            paused: false,
        },
        Request::EndSession => Response::SessionEnded {
            session: session.end_session().await,
        },
        Request::Export { offset } => {
            Response::Export(export_page(&app.db, &app.settings, offset).await?)
        }
        Request::Import { bundle } => {
            let bundle = parse_bundle(bundle)?;
            Response::Import(import_bundle(&app.db, &app.settings, &bundle).await?)
        }
        Request::GetSettings => Response::Settings {
            settings: app.settings.current(),
        },
        Request::UpdateSettings { settings } => {
            app.settings.update(&app.db, settings).await?;
            Response::Settings {
                settings: app.settings.current(),
            }
        }
        Request::GetDigest { period } => match period {
            DigestPeriod::Daily => Response::DailyDigest(session.daily_digest().await),
            DigestPeriod::Weekly => Response::WeeklyDigest(session.weekly_digest().await),
        },
        Request::ToggleFocusMode { domain } => {
            let blocked = app.focus.lock().await.toggle(&domain);
            Response::FocusMode { domain, blocked }
        }
        Request::CheckFocusMode { domain } => {
            let blocked = app.focus.lock().await.is_blocked(&domain);
            Response::FocusMode { domain, blocked }
        }
        Request::DisableFocusMode { domain } => {
            app.focus.lock().await.disable(&domain);
            Response::FocusMode {
                domain,
                blocked: false,
            }
        }
        Request::GetFocusStatus => Response::FocusStatus(app.focus.lock().await.status()),
    };
    Ok(response)
}
