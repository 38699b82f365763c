use std::path::Path;

pub fn run(root: &Path, bind: Option<String>) -> anyhow::Result<()> {
    let mut settings = super::load_settings(root)?;
    if let Some(bind) = bind {
        settings.server.bind = bind;
    }
    for w in settings.validate() {
        tracing::warn!(level = ?w.level, "{}", w.message);
    }

    super::block_on(async move {
        tokio::select! {
            res = kitforge_server::serve(settings) => res,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutting down");
                Ok(())
            }
        }
    })?
}
