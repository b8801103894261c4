use anyhow::Result;
use consumer_perf::{
    cli::Args,
    collector::{LATENCY_LOG_HEADER, STATS_LOG_HEADER},
    harness::{latency_log_path, stats_log_path},
    Harness, HarnessConfig,
};
use std::time::Duration;

/// Full run from CLI arguments: every consumer acknowledges, logs and the
/// JSON summary land on disk.
#[test]
fn harness_run_from_args_smoke() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let summary_path = dir.path().join("summary.json");
    let args = Args {
        workers: 3,
        item_count: 7,
        run_time: Duration::from_millis(300),
        collect_interval: Duration::from_millis(50),
        update_rate: 5_000,
        output_dir: dir.path().join("logs"),
        summary_file: summary_path.clone(),
        ..Default::default()
    };

    let config = HarnessConfig::from_args(&args)?;
    let summary = Harness::new(config).run()?;
    summary.write_json(&args.summary_file)?;

    assert!(summary.unacknowledged_workers().is_empty());
    assert_eq!(summary.totals.requests_sent, 7);
    assert_eq!(summary.totals.refresh_completes, 3);
    assert!(summary.latency[0].samples > 0);

    for worker in 0..3 {
        let stats = std::fs::read_to_string(stats_log_path(&args.output_dir, worker))?;
        assert_eq!(stats.lines().next(), Some(STATS_LOG_HEADER));
        for line in stats.lines().skip(1) {
            assert_eq!(line.split(',').count(), STATS_LOG_HEADER.split(',').count());
        }

        let latency = std::fs::read_to_string(latency_log_path(&args.output_dir, worker))?;
        assert_eq!(latency.lines().next(), Some(LATENCY_LOG_HEADER));
        let logged = latency.lines().skip(1).count() as u64;
        let report = &summary.workers[worker];
        let submitted: u64 = report.queues.iter().map(|q| q.submitted).sum();
        assert_eq!(logged, submitted);
    }

    let json: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&summary_path)?)?;
    assert_eq!(json["workers"].as_array().map(Vec::len), Some(3));
    assert_eq!(json["config"]["workers"], 3);
    Ok(())
}
