use std::env;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use s3_log_shipper::{
    ArchiveJob, CompressionMode, CustomTagStore, RollingPolicy, RolloverCoordinator,
    RolloverError, ShipperConfig,
};

/// Minimal time-based rotation host: renames the active file aside, hands a
/// real gzip job to the coordinator, and starts a fresh active file.
struct DemoPolicy {
    dir: PathBuf,
    index: u32,
    period_start: DateTime<Utc>,
    compression: Option<ArchiveJob>,
}

impl DemoPolicy {
    fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            index: 0,
            period_start: Utc::now(),
            compression: None,
        }
    }
}

impl RollingPolicy for DemoPolicy {
    fn active_file(&self) -> PathBuf {
        self.dir.join("app.log")
    }

    fn elapsed_file(&self) -> Option<PathBuf> {
        Some(self.dir.join(format!("app.log.{}", self.index + 1)))
    }

    fn compression_mode(&self) -> CompressionMode {
        CompressionMode::Gz
    }

    fn current_period_start(&self) -> DateTime<Utc> {
        self.period_start
    }

    fn raw_file(&self) -> Option<PathBuf> {
        Some(self.active_file())
    }

    fn rollover(&mut self) -> Result<(), RolloverError> {
        let elapsed = self.elapsed_file().unwrap();
        std::fs::rename(self.active_file(), &elapsed)?;
        std::fs::File::create(self.active_file())?;
        self.index += 1;
        self.period_start = Utc::now();

        // Gzip the rotated file in the background, like a real rotation
        // host would; the coordinator waits this out before uploading.
        let gz_path = PathBuf::from(format!("{}.gz", elapsed.display()));
        self.compression = Some(Box::pin(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            let content = tokio::fs::read(&elapsed).await.unwrap();
            let mut encoder =
                flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
            encoder.write_all(&content).unwrap();
            tokio::fs::write(&gz_path, encoder.finish().unwrap())
                .await
                .unwrap();
            tokio::fs::remove_file(&elapsed).await.unwrap();
        }));
        Ok(())
    }

    fn take_compression_job(&mut self) -> Option<ArchiveJob> {
        self.compression.take()
    }
}

fn append_line(path: &Path, line: &str) {
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .unwrap();
    writeln!(file, "{}", line).unwrap();
}

#[tokio::main]
async fn main() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info")
        .try_init();

    println!("--- Rotate and ship against MinIO ---");

    let endpoint =
        env::var("MINIO_ENDPOINT").unwrap_or_else(|_| "http://localhost:9000".to_string());
    let access_key = env::var("MINIO_ACCESS_KEY").unwrap_or_else(|_| "minioadmin".to_string());
    let secret_key = env::var("MINIO_SECRET_KEY").unwrap_or_else(|_| "minioadmin".to_string());
    let bucket = env::var("MINIO_BUCKET").unwrap_or_else(|_| "logs".to_string());

    let config = ShipperConfig {
        access_key: Some(access_key),
        secret_key: Some(secret_key),
        endpoint_url: Some(endpoint),
        bucket: bucket.clone(),
        folder_pattern: Some("demo/%d{yyyy/MM/dd}".to_string()),
        identifier_prefix: true,
        ..ShipperConfig::default()
    };

    // 1. Write into a local log directory
    let dir = PathBuf::from("demo-logs");
    std::fs::create_dir_all(&dir).unwrap();
    let active = dir.join("app.log");
    append_line(&active, "first period, line 1");
    append_line(&active, "first period, line 2");

    // 2. Start the coordinator and rotate twice
    let tag = CustomTagStore::new();
    let coordinator = RolloverCoordinator::start(&config, Box::new(DemoPolicy::new(dir)), tag.clone());

    coordinator.on_rollover().unwrap();
    println!("Rotated once; gzip and upload run in the background");

    append_line(&active, "second period, line 1");
    tag.set("second-run");
    coordinator.on_rollover().unwrap();
    println!("Rotated again with custom tag 'second-run'");

    // 3. Leave something in the active file, then drain everything
    append_line(&active, "third period, never rotated");
    coordinator.shutdown().await;
    println!(
        "Done. Check bucket '{}' under demo/<date>/ for app.log.1.gz, app.log.2.gz and the timestamped active file",
        bucket
    );
}
