use std::process;
use std::sync::{atomic::AtomicBool, atomic::Ordering, Arc};
use std::thread;
use std::time;

use chrono::{Duration, Utc};
use mio::net::TcpListener;
use ndjsonlogger::{error, info, warn};
use serde_json::json;

use coffer::config::Config;
use coffer::errors::{fatal_io_error, RuntimeResult};
use coffer::logger::NdjsonLogger;
use coffer::server::{run_server, Handler};
use coffer::{FileBlock, HttpRequest, Logger, NoBody, Payload, Response, TextResult};

const STYLESHEET: &[u8] = b"body { font-family: sans-serif; }\n";

fn main() {
    let cfg = match Config::from_env() {
        Ok(cfg) => Arc::new(cfg),
        Err(s) => {
            error!("couldn't load config from environment", { error = &s });
            process::exit(1);
        }
    };

    if let Err(e) = run(cfg) {
        error!("runtime error", { error = &e.reason() });
        process::exit(1);
    }
}

fn run(cfg: Arc<Config>) -> RuntimeResult {
    let listener = TcpListener::bind(cfg.bind_addr)
        .map_err(|err| fatal_io_error("couldn't bind tcp listener on port", err))?;

    info!("coffer started", {
        ["coffer.version"             : usize = [cfg.version.0, cfg.version.1]],
        "cfg.port"                    : u16   = cfg.port(),
        "cfg.max_connections"         : usize = cfg.max_conns,
        "cfg.buffer_size"             : usize = cfg.buffer_size,
        "cfg.max_body_size"           : usize = cfg.max_body_size,
        "cfg.response_pool_size"      : usize = cfg.response_pool_size,
        "cfg.log_level"                       = cfg.log_level.as_str()
    });

    let running = Arc::new(AtomicBool::new(true));
    ctrlc_handler(running.clone());

    let logger: Arc<dyn Logger> = Arc::new(NdjsonLogger::new(cfg.log_level));
    run_server(cfg, running, listener, Arc::new(Demo), logger)?;

    info!("coffer closing");
    Ok(())
}

fn ctrlc_handler(running: Arc<AtomicBool>) {
    let ctrlc_res = ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    });

    if let Err(e) = ctrlc_res {
        warn!("failed to register ctrlc handler - no graceful shutdown", {
            error = &format!("{}", e)
        });
    }
}

/// Routes showing each kind of completion.
struct Demo;

impl Handler for Demo {
    fn handle(&self, request: &Arc<HttpRequest>, response: &Arc<Response>) {
        match request.base_url() {
            "/" | "/hello" => {
                response.set_date();
                response.result(TextResult::plain("hello from coffer\n"));
            }
            "/json" => {
                let method: &str = request.method.as_ref();
                response.result(json!({
                    "method": method,
                    "query": request.url.query(),
                    "remote_addr": request.remote_addr.to_string(),
                }));
            }
            "/style.css" => {
                response.result(FileBlock::whole(STYLESHEET.to_vec()).with_content_type("text/css"));
            }
            "/old" => {
                response.set_status("301", "Moved Permanently");
                response.result(Payload::value(NoBody::redirect("/hello")));
            }
            "/login" => {
                response.set_cookie("session", &request.context.span_id, None);
                response.set_cookie("seen", "yes", Some(Utc::now() + Duration::days(30)));
                response.result(TextResult::plain("logged in\n"));
            }
            "/slow" => {
                // Completed from another thread after the handler returns
                response.mark_async();
                let response = response.clone();
                thread::spawn(move || {
                    thread::sleep(time::Duration::from_millis(500));
                    response.result(TextResult::plain("sorry for the wait\n"));
                });
            }
            "/stall" => {
                // Never completed here; answered by the completion timeout
                response.mark_async();
            }
            _ => {
                response.set_status("404", "Not Found");
                response.result_empty();
            }
        }
    }
}
