use netcore::config::Config;
use netcore::http::request::Method;
use netcore::server::{Router, Server};

fn routes() -> anyhow::Result<Router> {
    let mut router = Router::new();

    router.register("/hello", Method::GET, |_, res| {
        res.set_body("Hello, World!")?;
        Ok(())
    })?;

    router.register("/items/{id}", Method::GET, |req, res| {
        res.set_json_body(serde_json::json!({ "id": req.id }))?;
        Ok(())
    })?;

    router.register("/echo", Method::POST, |req, res| {
        match &req.json_body {
            Some(json) => res.set_json_body(json.clone())?,
            None => res.set_body(req.body.clone().unwrap_or_default())?,
        }
        Ok(())
    })?;

    router.register("/s", Method::GET, |req, res| {
        res.set_body(req.query_param("q").unwrap_or("?"))?;
        Ok(())
    })?;

    Ok(router)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = Config::load()?;

    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .with_max_level(cfg.log_level.parse().unwrap_or(tracing::Level::INFO))
        .init();

    let mut server = Server::bind(cfg.port, routes()?)?;
    if let Some(tls) = &cfg.tls {
        server = server.with_tls(&tls.cert_path, &tls.key_path)?;
    }
    let handle = server.handle();

    let mut task = tokio::task::spawn_blocking(move || server.run());

    tokio::select! {
        res = &mut task => {
            res??;
        }

        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
            handle.stop();
            task.await??;
        }
    }

    Ok(())
}
