// 该文件是 Liangce （量测） 项目的一部分。
// src/server.rs - HTTP 控制与推流服务
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

//! # HTTP 服务
//!
//! | 路由 | 说明 |
//! |------|------|
//! | `GET /` | 控制页面 |
//! | `POST /start` | 表单字段 `rtsp_url`，为空时使用配置中的来源 |
//! | `POST /stop` | 停止流水线 |
//! | `GET /video_feed` | `multipart/x-mixed-replace` JPEG 流 |
//! | `GET /frame.jpg` | 最新一帧，没有帧时返回 204 |
//! | `GET /status` | 运行状态 JSON |
//!
//! 控制器的调用会阻塞（打开视频流、等待新帧），全部放到 `web::block` 中执行。

use std::{fmt::Display, sync::Arc, time::Duration};

use actix_web::{
  App, HttpResponse, HttpServer,
  http::header,
  web::{self, Bytes},
};
use async_stream::stream;
use image::RgbImage;
use serde::Deserialize;
use tracing::{error, info, warn};

use crate::{
  config::AppConfig,
  model::{DetectResult, Model},
  output::FrameFeed,
  pipeline::{ControlError, ControlReply, Controller, ControllerStatus},
};

const INDEX_HTML: &str = include_str!("../assets/index.html");
/// 推流中单次等待新帧的时长
const FRAME_WAIT: Duration = Duration::from_secs(1);

/// HTTP 层使用的控制接口
pub trait ControlSurface: Send + Sync {
  fn start(&self, source_uri: &str) -> Result<ControlReply, ControlError>;
  fn stop(&self) -> ControlReply;
  fn status(&self) -> ControllerStatus;
  fn feed(&self) -> FrameFeed;
}

impl<M> ControlSurface for Controller<M>
where
  M: Model<Input = RgbImage, Output = DetectResult> + Send + Sync + 'static,
  M::Error: Display,
{
  fn start(&self, source_uri: &str) -> Result<ControlReply, ControlError> {
    Controller::start(self, source_uri)
  }

  fn stop(&self) -> ControlReply {
    Controller::stop(self)
  }

  fn status(&self) -> ControllerStatus {
    Controller::status(self)
  }

  fn feed(&self) -> FrameFeed {
    Controller::feed(self).clone()
  }
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
  pub bind: String,
  pub default_source: String,
  pub stream_interval: Duration,
}

impl ServerSettings {
  pub fn from_config(config: &AppConfig) -> Self {
    Self {
      bind: config.http.bind.clone(),
      default_source: config.source.clone(),
      stream_interval: config.stream_interval(),
    }
  }
}

struct ServerState {
  control: Arc<dyn ControlSurface>,
  settings: ServerSettings,
}

#[derive(Deserialize)]
struct StartForm {
  rtsp_url: Option<String>,
}

/// 注册所有路由
pub fn routes(cfg: &mut web::ServiceConfig) {
  cfg
    .route("/", web::get().to(index_route))
    .route("/start", web::post().to(start_handler))
    .route("/stop", web::post().to(stop_handler))
    .route("/video_feed", web::get().to(video_feed_handler))
    .route("/frame.jpg", web::get().to(frame_handler))
    .route("/status", web::get().to(status_handler));
}

/// 在当前 actix 运行时中启动服务，直到服务退出（例如收到 Ctrl+C）
pub async fn serve(control: Arc<dyn ControlSurface>, settings: ServerSettings) -> std::io::Result<()> {
  let bind = settings.bind.clone();
  let state = web::Data::new(ServerState { control, settings });

  info!("HTTP 服务监听 {}", bind);
  HttpServer::new(move || App::new().app_data(state.clone()).configure(routes))
    .bind(bind.as_str())?
    .run()
    .await
}

async fn index_route() -> HttpResponse {
  HttpResponse::Ok()
    .content_type("text/html; charset=utf-8")
    .body(INDEX_HTML)
}

async fn start_handler(
  form: Option<web::Form<StartForm>>,
  state: web::Data<ServerState>,
) -> HttpResponse {
  let source = form
    .and_then(|form| form.into_inner().rtsp_url)
    .map(|url| url.trim().to_string())
    .filter(|url| !url.is_empty())
    .unwrap_or_else(|| state.settings.default_source.clone());

  info!("收到启动请求: {}", source);
  let control = state.control.clone();
  match web::block(move || control.start(&source)).await {
    Ok(Ok(reply)) => HttpResponse::Ok().body(reply.to_string()),
    Ok(Err(ControlError::AlreadyRunning)) => HttpResponse::Conflict().body("AlreadyRunning"),
    Ok(Err(e @ ControlError::SourceUnavailable(_))) => HttpResponse::BadGateway().body(e.to_string()),
    Ok(Err(e @ ControlError::Cancelled)) => HttpResponse::Conflict().body(e.to_string()),
    Ok(Err(e)) => {
      error!("启动失败: {}", e);
      HttpResponse::InternalServerError().body(e.to_string())
    }
    Err(e) => {
      error!("启动任务执行失败: {}", e);
      HttpResponse::InternalServerError().finish()
    }
  }
}

async fn stop_handler(state: web::Data<ServerState>) -> HttpResponse {
  info!("收到停止请求");
  HttpResponse::Ok().body(state.control.stop().to_string())
}

async fn status_handler(state: web::Data<ServerState>) -> HttpResponse {
  HttpResponse::Ok().json(state.control.status())
}

async fn frame_handler(state: web::Data<ServerState>) -> HttpResponse {
  let feed = state.control.feed();
  match web::block(move || feed.next_encoded_frame(Duration::ZERO)).await {
    Ok(Some(frame)) => HttpResponse::Ok()
      .content_type("image/jpeg")
      .append_header(("X-Sequence", frame.seq.to_string()))
      .body(Bytes::copy_from_slice(&frame.jpeg)),
    Ok(None) => HttpResponse::NoContent().finish(),
    Err(e) => {
      error!("读取最新帧失败: {}", e);
      HttpResponse::InternalServerError().finish()
    }
  }
}

/// 以 multipart 流推送标注后的帧，没有新帧时跳过
async fn video_feed_handler(state: web::Data<ServerState>) -> HttpResponse {
  let feed = state.control.feed();
  let stream_interval = state.settings.stream_interval;

  let stream = stream! {
    let mut interval = actix_web::rt::time::interval(stream_interval);
    let mut last_id: Option<u64> = None;
    loop {
      interval.tick().await;
      let feed = feed.clone();
      let frame = match web::block(move || feed.next_encoded_frame_after(last_id, FRAME_WAIT)).await {
        Ok(frame) => frame,
        Err(e) => {
          warn!("推流等待新帧失败: {}", e);
          break;
        }
      };
      if let Some(frame) = frame {
        last_id = Some(frame.id);
        let mut payload = Vec::with_capacity(frame.jpeg.len() + 64);
        payload.extend_from_slice(b"--frame\r\n");
        payload.extend_from_slice(format!("X-Sequence: {}\r\n", frame.seq).as_bytes());
        payload.extend_from_slice(b"Content-Type: image/jpeg\r\n\r\n");
        payload.extend_from_slice(&frame.jpeg);
        payload.extend_from_slice(b"\r\n");
        yield Ok::<Bytes, actix_web::Error>(Bytes::from(payload));
      }
    }
  };

  HttpResponse::Ok()
    .append_header((header::CACHE_CONTROL, "no-cache"))
    .append_header((header::CONTENT_TYPE, "multipart/x-mixed-replace; boundary=frame"))
    .streaming(stream)
}
