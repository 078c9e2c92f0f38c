pub mod capture;
pub mod dispatch;
pub mod gemini;
mod http;
pub mod image_prep;
pub mod openai;
pub mod provider;

pub use capture::{capture_screenshot, CaptureCommand, ScreenshotCapture};
pub use dispatch::{DispatchHandle, DispatchState, Dispatcher, StartError};
pub use gemini::{GeminiClient, GeminiModel};
pub use image_prep::{validate_and_prepare, MAX_DIMENSION, MAX_IMAGE_BYTES};
pub use openai::OpenAiClient;
pub use provider::{build_provider, ClientOptions, OpenAiProvider, VisionProvider};

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
