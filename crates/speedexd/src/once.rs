//! `speedexd once`: one measurement, printed as exposition text.

use std::io::Write;
use std::process::ExitCode;
use std::sync::Arc;

use tracing::info;

use speedex_core::Settings;
use speedex_metrics::{Coordinator, ResultCache, StateFile, render_prometheus};
use speedex_runner::SpeedtestRunner;

pub async fn run_once(settings: Settings) -> anyhow::Result<ExitCode> {
    let runner = Arc::new(SpeedtestRunner::new(settings.tool));
    let mut coordinator = Coordinator::new(runner, Arc::new(ResultCache::new()));
    if let Some(path) = settings.state_path {
        info!(path = %path.display(), "result will be written to state file");
        coordinator = coordinator.with_state_file(StateFile::new(path));
    }
    let coordinator = Arc::new(coordinator);

    let result = coordinator.run_or_join().await;

    let mut stdout = std::io::stdout().lock();
    stdout.write_all(render_prometheus(Some(&result)).as_bytes())?;
    stdout.flush()?;

    Ok(if result.succeeded() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
