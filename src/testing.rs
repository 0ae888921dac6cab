//! Scripted fakes for the collaborator traits plus small image fixtures.

use std::{collections::VecDeque, io::Cursor, path::Path, time::Duration};

use async_trait::async_trait;
use base64::Engine;
use image::{ImageFormat, Rgb, RgbImage};
use parking_lot::Mutex;

use crate::{
    models::Price,
    services::{
        Candidate, Content, GenerateContentResponse, ImageSynthesis, InlineData, InlineImage, Part, RawListing,
        SearchParams, ServiceError, ShoppingSearch, TextCompletion,
    },
};

type Responder = Box<dyn Fn(&str, &str) -> Result<String, ServiceError> + Send + Sync>;

pub struct FakeCompletion {
    responder: Responder,
    delay: Option<Duration>,
    calls: Mutex<usize>,
}

impl FakeCompletion {
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&str, &str) -> Result<String, ServiceError> + Send + Sync + 'static,
    {
        Self { responder: Box::new(responder), delay: None, calls: Mutex::new(0) }
    }

    pub fn replying(reply: &str) -> Self {
        let reply = reply.to_string();
        Self::new(move |_, _| Ok(reply.clone()))
    }

    /// Returns `error` on the first call and a generic HTTP error afterwards.
    pub fn failing(error: ServiceError) -> Self {
        let first = Mutex::new(Some(error));
        Self::new(move |_, _| Err(first.lock().take().unwrap_or_else(|| ServiceError::Http("unavailable".into()))))
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock()
    }
}

#[async_trait]
impl TextCompletion for FakeCompletion {
    async fn complete(&self, instruction: &str, user_text: &str) -> Result<String, ServiceError> {
        *self.calls.lock() += 1;
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        (self.responder)(instruction, user_text)
    }
}

pub struct FakeSearch {
    result: Mutex<Option<Result<Vec<RawListing>, ServiceError>>>,
    delay: Option<Duration>,
    params: Mutex<Vec<SearchParams>>,
}

impl FakeSearch {
    pub fn returning(listings: Vec<RawListing>) -> Self {
        Self { result: Mutex::new(Some(Ok(listings))), delay: None, params: Mutex::new(Vec::new()) }
    }

    pub fn failing(error: ServiceError) -> Self {
        Self { result: Mutex::new(Some(Err(error))), delay: None, params: Mutex::new(Vec::new()) }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.params.lock().len()
    }

    pub fn last_params(&self) -> Option<SearchParams> {
        self.params.lock().last().cloned()
    }
}

#[async_trait]
impl ShoppingSearch for FakeSearch {
    async fn search(&self, params: &SearchParams) -> Result<Vec<RawListing>, ServiceError> {
        self.params.lock().push(params.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.result.lock().take().unwrap_or_else(|| Err(ServiceError::Http("already consumed".into())))
    }
}

/// Plays back one scripted response per call; an exhausted script answers `Empty`.
pub struct FakeSynthesis {
    script: Mutex<VecDeque<Result<GenerateContentResponse, ServiceError>>>,
    delay: Option<Duration>,
    calls: Mutex<usize>,
}

impl FakeSynthesis {
    pub fn scripted(script: Vec<Result<GenerateContentResponse, ServiceError>>) -> Self {
        Self { script: Mutex::new(script.into()), delay: None, calls: Mutex::new(0) }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock()
    }
}

#[async_trait]
impl ImageSynthesis for FakeSynthesis {
    async fn synthesize(
        &self,
        _prompt: &str,
        _subject: &InlineImage,
        _garment: &InlineImage,
    ) -> Result<GenerateContentResponse, ServiceError> {
        *self.calls.lock() += 1;
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.script.lock().pop_front().unwrap_or(Err(ServiceError::Empty))
    }
}

pub fn listing(brand: &str, i: usize) -> RawListing {
    RawListing {
        title: Some(format!("{brand} item {i}")),
        extracted_price: Some(Price::Amount(10.0 * i as f64)),
        price: None,
        thumbnail: Some(format!("https://img.example/{i}.jpg")),
        link: Some(format!("https://shop.example/p/{i}")),
        product_link: None,
        source: Some(brand.to_string()),
    }
}

pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = RgbImage::from_pixel(width, height, Rgb([180, 40, 40]));
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, ImageFormat::Png).unwrap();
    out.into_inner()
}

/// Writes a small PNG under `dir` and returns its path as a locator string.
pub fn write_png(dir: &Path, name: &str) -> String {
    let path = dir.join(name);
    std::fs::write(&path, png_bytes(16, 16)).unwrap();
    path.to_string_lossy().into_owned()
}

pub fn image_response(bytes: &[u8]) -> GenerateContentResponse {
    GenerateContentResponse {
        candidates: vec![Candidate {
            content: Content {
                parts: vec![
                    Part::Text { text: "Here is the try-on.".into() },
                    Part::Inline {
                        inline_data: InlineData {
                            data: base64::engine::general_purpose::STANDARD.encode(bytes),
                            mime_type: Some("image/png".into()),
                        },
                    },
                ],
            },
            finish_reason: Some("STOP".into()),
        }],
        prompt_feedback: None,
    }
}

pub fn text_response(text: &str) -> GenerateContentResponse {
    GenerateContentResponse {
        candidates: vec![Candidate {
            content: Content { parts: vec![Part::Text { text: text.into() }] },
            finish_reason: Some("STOP".into()),
        }],
        prompt_feedback: None,
    }
}
