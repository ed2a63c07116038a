// gbsim-media: ffmpeg 推流执行器
// 每路会话对应一个 ffmpeg 子进程，向平台协商出的地址推送 RTP 流
// 每个进程配一个轻量监视任务，意外退出时回收登记项

use gbsim_core::{SimError, StreamInfo, StreamTransport};
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// 监视任务的轮询间隔
const MONITOR_INTERVAL: Duration = Duration::from_secs(5);

/// 保留的 ffmpeg stderr 末尾行数，意外退出时随告警输出
const STDERR_TAIL_LINES: usize = 20;

#[derive(Error, Debug)]
pub enum MediaError {
    #[error("video source not found: {0}")]
    MissingSource(PathBuf),

    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[error("stream already running for call {0}")]
    DuplicateStream(String),

    #[error("no stream for call {0}")]
    UnknownStream(String),
}

impl From<MediaError> for SimError {
    fn from(e: MediaError) -> Self {
        match e {
            MediaError::UnknownStream(call_id) => SimError::SessionNotFound(call_id),
            other => SimError::Other(other.to_string()),
        }
    }
}

/// 推流内容来源
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaSource {
    /// 循环播放本地视频文件
    File(PathBuf),
    /// lavfi 测试画面（无素材时的缺省）
    TestPattern,
}

/// 媒体层配置
#[derive(Debug, Clone)]
pub struct MediaConfig {
    /// ffmpeg 可执行文件路径
    pub ffmpeg_path: String,

    pub source: MediaSource,
}

impl Default for MediaConfig {
    fn default() -> Self {
        MediaConfig {
            ffmpeg_path: "ffmpeg".to_string(),
            source: MediaSource::TestPattern,
        }
    }
}

/// 按会话参数生成 ffmpeg 命令行参数
pub fn build_ffmpeg_args(config: &MediaConfig, info: &StreamInfo) -> Vec<String> {
    let mut args: Vec<String> = Vec::new();
    match &config.source {
        MediaSource::File(path) => {
            args.extend(
                ["-re", "-stream_loop", "-1", "-i"]
                    .iter()
                    .map(|s| s.to_string()),
            );
            args.push(path.to_string_lossy().into_owned());
        }
        MediaSource::TestPattern => {
            args.extend(
                ["-re", "-f", "lavfi", "-i", "testsrc=size=640x480:rate=25"]
                    .iter()
                    .map(|s| s.to_string()),
            );
        }
    }
    args.extend(
        [
            "-vcodec",
            "libx264",
            "-preset",
            "ultrafast",
            "-tune",
            "zerolatency",
            "-an",
            "-f",
            "rtp_mpegts",
        ]
        .iter()
        .map(|s| s.to_string()),
    );
    args.push(format!("rtp://{}:{}", info.dest_ip, info.dest_port));
    args
}

type StderrTail = Arc<Mutex<VecDeque<String>>>;

struct StreamRecord {
    child: Child,
    info: StreamInfo,
    started_at: Instant,
    stderr_tail: StderrTail,
}

/// 一路在推的流的快照
#[derive(Debug, Clone)]
pub struct ActiveStream {
    pub call_id: String,
    pub channel_id: String,
    pub dest_ip: String,
    pub dest_port: u16,
    pub elapsed: Duration,
}

type StreamMap = Arc<Mutex<HashMap<String, StreamRecord>>>;

/// ffmpeg 进程管理器
pub struct MediaServer {
    config: MediaConfig,
    processes: StreamMap,
}

impl MediaServer {
    /// 创建媒体服务，文件来源时校验素材存在
    pub fn new(config: MediaConfig) -> Result<Self, MediaError> {
        if let MediaSource::File(path) = &config.source {
            if !Path::new(path).is_file() {
                return Err(MediaError::MissingSource(path.clone()));
            }
        }
        Ok(MediaServer {
            config,
            processes: StreamMap::default(),
        })
    }

    async fn start(&self, info: &StreamInfo) -> Result<(), MediaError> {
        let mut processes = self.processes.lock().await;
        if processes.contains_key(&info.call_id) {
            return Err(MediaError::DuplicateStream(info.call_id.clone()));
        }

        let args = build_ffmpeg_args(&self.config, info);
        info!(
            call_id = %info.call_id,
            channel = %info.channel_id,
            dest = %format!("{}:{}", info.dest_ip, info.dest_port),
            "starting ffmpeg"
        );
        let mut child = Command::new(&self.config.ffmpeg_path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| MediaError::Spawn {
                program: self.config.ffmpeg_path.clone(),
                source: e,
            })?;
        // 持续读 stderr 并保留末尾若干行，意外退出时用于诊断
        let stderr_tail = StderrTail::default();
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(pump_stderr(stderr, stderr_tail.clone()));
        }
        processes.insert(
            info.call_id.clone(),
            StreamRecord {
                child,
                info: info.clone(),
                started_at: Instant::now(),
                stderr_tail,
            },
        );
        tokio::spawn(monitor(self.processes.clone(), info.call_id.clone()));
        Ok(())
    }

    async fn stop(&self, call_id: &str) -> Result<(), MediaError> {
        let mut record = self
            .processes
            .lock()
            .await
            .remove(call_id)
            .ok_or_else(|| MediaError::UnknownStream(call_id.to_string()))?;

        info!(call_id = %call_id, "stopping ffmpeg");
        // 进程可能已自行退出，kill 失败不视为错误
        if let Err(e) = record.child.kill().await {
            debug!(call_id = %call_id, error = %e, "ffmpeg already exited");
        }
        Ok(())
    }

    /// 正在推的流
    pub async fn list_active(&self) -> Vec<ActiveStream> {
        self.processes
            .lock()
            .await
            .values()
            .map(|record| ActiveStream {
                call_id: record.info.call_id.clone(),
                channel_id: record.info.channel_id.clone(),
                dest_ip: record.info.dest_ip.clone(),
                dest_port: record.info.dest_port,
                elapsed: record.started_at.elapsed(),
            })
            .collect()
    }

    /// 停止全部推流（停机清理）
    pub async fn stop_all(&self) {
        let records: Vec<(String, StreamRecord)> =
            self.processes.lock().await.drain().collect();
        for (call_id, mut record) in records {
            info!(call_id = %call_id, "stopping ffmpeg");
            if let Err(e) = record.child.kill().await {
                debug!(call_id = %call_id, error = %e, "ffmpeg already exited");
            }
        }
    }
}

/// 将子进程 stderr 读入有界的行缓冲，只保留末尾若干行
async fn pump_stderr(stderr: impl AsyncRead + Unpin, tail: StderrTail) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let mut tail = tail.lock().await;
        if tail.len() == STDERR_TAIL_LINES {
            tail.pop_front();
        }
        tail.push_back(line);
    }
}

/// 监视一路流的子进程，意外退出时带上 stderr 末尾输出并移除登记项
async fn monitor(processes: StreamMap, call_id: String) {
    let mut ticker = tokio::time::interval(MONITOR_INTERVAL);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let mut map = processes.lock().await;
        let Some(record) = map.get_mut(&call_id) else {
            // 已被 stop 移除
            break;
        };
        match record.child.try_wait() {
            Ok(None) => {}
            Ok(Some(status)) => {
                let tail = record.stderr_tail.clone();
                map.remove(&call_id);
                drop(map);
                let diag: Vec<String> = tail.lock().await.iter().cloned().collect();
                warn!(
                    call_id = %call_id,
                    status = %status,
                    stderr = %diag.join("\n"),
                    "ffmpeg exited unexpectedly"
                );
                break;
            }
            Err(e) => {
                warn!(call_id = %call_id, error = %e, "failed to poll ffmpeg");
                map.remove(&call_id);
                break;
            }
        }
    }
}

#[async_trait::async_trait]
impl StreamTransport for MediaServer {
    async fn start_stream(&self, info: &StreamInfo) -> gbsim_core::Result<()> {
        Ok(self.start(info).await?)
    }

    async fn stop_stream(&self, call_id: &str) -> gbsim_core::Result<()> {
        Ok(self.stop(call_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream_info(call_id: &str) -> StreamInfo {
        StreamInfo {
            call_id: call_id.to_string(),
            channel_id: "34020000001320000002".to_string(),
            dest_ip: "192.168.1.100".to_string(),
            dest_port: 30000,
            ssrc: "0100000001".to_string(),
        }
    }

    #[test]
    fn test_args_for_file_source() {
        let config = MediaConfig {
            ffmpeg_path: "ffmpeg".to_string(),
            source: MediaSource::File(PathBuf::from("/data/sample.mp4")),
        };
        let args = build_ffmpeg_args(&config, &stream_info("c1"));
        assert_eq!(args[0], "-re");
        assert!(args.contains(&"-stream_loop".to_string()));
        assert!(args.contains(&"/data/sample.mp4".to_string()));
        assert!(args.contains(&"zerolatency".to_string()));
        assert_eq!(args.last().unwrap(), "rtp://192.168.1.100:30000");
    }

    #[test]
    fn test_args_for_test_pattern() {
        let args = build_ffmpeg_args(&MediaConfig::default(), &stream_info("c1"));
        assert!(args.contains(&"lavfi".to_string()));
        assert!(args.iter().any(|a| a.starts_with("testsrc=")));
        assert!(!args.contains(&"-stream_loop".to_string()));
    }

    #[test]
    fn test_missing_source_file_rejected() {
        let config = MediaConfig {
            ffmpeg_path: "ffmpeg".to_string(),
            source: MediaSource::File(PathBuf::from("/no/such/video.mp4")),
        };
        assert!(matches!(
            MediaServer::new(config),
            Err(MediaError::MissingSource(_))
        ));
    }

    #[test]
    fn test_existing_source_file_accepted() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let config = MediaConfig {
            ffmpeg_path: "ffmpeg".to_string(),
            source: MediaSource::File(file.path().to_path_buf()),
        };
        assert!(MediaServer::new(config).is_ok());
    }

    // 以常驻的 sleep 进程代替 ffmpeg，只验证进程表的增删
    fn sleep_server() -> MediaServer {
        MediaServer::new(MediaConfig {
            ffmpeg_path: "sleep".to_string(),
            source: MediaSource::TestPattern,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_stream_lifecycle_bookkeeping() {
        let server = sleep_server();
        server.start(&stream_info("c1")).await.unwrap();
        assert!(matches!(
            server.start(&stream_info("c1")).await,
            Err(MediaError::DuplicateStream(_))
        ));

        let active = server.list_active().await;
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].call_id, "c1");
        assert_eq!(active[0].dest_port, 30000);

        server.stop("c1").await.unwrap();
        assert!(server.list_active().await.is_empty());
        assert!(matches!(
            server.stop("c1").await,
            Err(MediaError::UnknownStream(_))
        ));
    }

    #[tokio::test]
    async fn test_trait_maps_unknown_stream_to_session_error() {
        let server = sleep_server();
        let result = StreamTransport::stop_stream(&server, "missing").await;
        assert!(matches!(result, Err(SimError::SessionNotFound(_))));
    }

    #[tokio::test]
    async fn test_stop_all_clears_registry() {
        let server = sleep_server();
        server.start(&stream_info("c1")).await.unwrap();
        server.start(&stream_info("c2")).await.unwrap();
        server.stop_all().await;
        assert!(server.list_active().await.is_empty());
    }

    #[tokio::test]
    async fn test_stderr_tail_keeps_recent_lines() {
        let mut input = String::new();
        for i in 0..25 {
            input.push_str(&format!("line {}\n", i));
        }
        let tail = StderrTail::default();
        pump_stderr(input.as_bytes(), tail.clone()).await;

        let tail = tail.lock().await;
        assert_eq!(tail.len(), STDERR_TAIL_LINES);
        assert_eq!(tail.front().unwrap(), "line 5");
        assert_eq!(tail.back().unwrap(), "line 24");
    }

    #[tokio::test]
    async fn test_started_stream_captures_stderr() {
        // sh 不认识 ffmpeg 的参数，会向 stderr 报错，读取任务应能收到
        let server = MediaServer::new(MediaConfig {
            ffmpeg_path: "sh".to_string(),
            source: MediaSource::TestPattern,
        })
        .unwrap();
        server.start(&stream_info("c1")).await.unwrap();

        let tail = {
            let map = server.processes.lock().await;
            map.get("c1").unwrap().stderr_tail.clone()
        };
        let mut seen = false;
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(20)).await;
            if !tail.lock().await.is_empty() {
                seen = true;
                break;
            }
        }
        assert!(seen);
        let _ = server.stop("c1").await;
    }

    #[tokio::test]
    async fn test_spawn_failure_is_reported() {
        let server = MediaServer::new(MediaConfig {
            ffmpeg_path: "/no/such/ffmpeg".to_string(),
            source: MediaSource::TestPattern,
        })
        .unwrap();
        assert!(matches!(
            server.start(&stream_info("c1")).await,
            Err(MediaError::Spawn { .. })
        ));
        assert!(server.list_active().await.is_empty());
    }
}
