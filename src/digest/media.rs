use anyhow::{Context, Result};
use reqwest::blocking::Client;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

use crate::digest::util::{now_epoch_millis, truncate_with_ellipsis};

const MAX_FILE_NAME_CHARS: usize = 200;
const FALLBACK_EXTENSION: &str = ".jpg";
const ILLEGAL_FILE_CHARS: [char; 9] = ['\\', '/', '*', '?', ':', '"', '<', '>', '|'];
const VIDEO_EXTENSIONS: [&str; 5] = ["mp4", "mov", "avi", "mkv", "webm"];
const GIF_FRAMES_ENABLED: bool = cfg!(feature = "gif");

/// Advisory note attached to a normalized (or skipped) image. Rendered
/// verbatim inside prompt placeholders and failure brackets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Annotation {
    Plain,
    FromGif,
    DownloadFailed(String),
    MissingCapability,
    Video,
    ProcessingFailed,
    FileError,
}

impl fmt::Display for Annotation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Annotation::Plain => Ok(()),
            Annotation::FromGif => f.write_str(" (来自GIF)"),
            Annotation::DownloadFailed(name) => write!(f, " (下载失败: {name})"),
            Annotation::MissingCapability => f.write_str(" (来自GIF - 缺少解码支持)"),
            Annotation::Video => f.write_str(" (来自视频 - 不支持提取)"),
            Annotation::ProcessingFailed => f.write_str(" (来自GIF - 处理失败)"),
            Annotation::FileError => f.write_str(" (文件错误)"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedImage {
    pub path: PathBuf,
    pub annotation: Annotation,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaOutcome {
    Ready(NormalizedImage),
    Skipped(Annotation),
}

/// Turns a remote image reference into a local file the model can read.
pub trait ImageSource {
    fn normalize(&self, url: &str, suggested_name: Option<&str>, context_id: &str) -> MediaOutcome;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MediaKind {
    Still,
    Animated,
    Video,
}

fn classify(file_name: &str) -> MediaKind {
    let ext = Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    if ext == "gif" {
        MediaKind::Animated
    } else if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
        MediaKind::Video
    } else {
        MediaKind::Still
    }
}

pub fn sanitize_file_name(name: &str) -> String {
    let kept: String = name
        .chars()
        .filter(|c| !ILLEGAL_FILE_CHARS.contains(c))
        .take(MAX_FILE_NAME_CHARS)
        .collect();
    kept.trim().to_string()
}

/// Extension of the last path segment, dot included, like `.png`.
fn url_extension(url: &str) -> Option<&str> {
    let path = url.split('?').next().unwrap_or(url);
    let segment = path.rsplit('/').next().unwrap_or(path);
    let idx = segment.rfind('.').filter(|&i| i > 0)?;
    let ext = &segment[idx..];
    (2..=5).contains(&ext.len()).then_some(ext)
}

/// Cache file name for an image. Generic or extension-less gateway names get
/// a synthesized `msg_<context>_<millis><ext>` name instead.
pub fn cache_file_name(
    url: &str,
    suggested_name: Option<&str>,
    context_id: &str,
    now_millis: u128,
) -> String {
    let base = suggested_name
        .map(|s| s.rsplit('/').next().unwrap_or(s))
        .unwrap_or_default();
    if !base.is_empty() && base != "image" && base.contains('.') {
        let cleaned = sanitize_file_name(base);
        if !cleaned.is_empty() {
            return cleaned;
        }
    }
    let ext = url_extension(url).unwrap_or(FALLBACK_EXTENSION);
    sanitize_file_name(&format!("msg_{context_id}_{now_millis}{ext}"))
}

pub fn frame_file_name(original: &str) -> String {
    let stem = Path::new(original)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(original);
    sanitize_file_name(&format!("{stem}_frame0.png"))
}

fn is_non_empty_file(path: &Path) -> bool {
    fs::metadata(path)
        .map(|meta| meta.is_file() && meta.len() > 0)
        .unwrap_or(false)
}

/// Decode the first frame of `src` and write it to `dest` as PNG. Alpha
/// channels survive as RGBA, everything else is flattened to RGB.
pub fn extract_first_frame(src: &Path, dest: &Path) -> Result<()> {
    let decoded =
        image::open(src).with_context(|| format!("failed to decode {}", src.display()))?;
    let frame = if decoded.color().has_alpha() {
        image::DynamicImage::ImageRgba8(decoded.to_rgba8())
    } else {
        image::DynamicImage::ImageRgb8(decoded.to_rgb8())
    };
    frame
        .save_with_format(dest, image::ImageFormat::Png)
        .with_context(|| format!("failed to write {}", dest.display()))?;
    Ok(())
}

pub fn mime_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "heic" => "image/heic",
        "heif" => "image/heif",
        _ => "application/octet-stream",
    }
}

pub struct ImageNormalizer {
    http: Client,
    cache_dir: PathBuf,
}

impl ImageNormalizer {
    pub fn new(cache_dir: PathBuf, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build image http client")?;
        Ok(Self { http, cache_dir })
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    fn download(&self, url: &str, dest: &Path) -> Result<()> {
        let mut response = self.http.get(url).send()?.error_for_status()?;
        let mut file = fs::File::create(dest)
            .with_context(|| format!("failed to create {}", dest.display()))?;
        response.copy_to(&mut file)?;
        Ok(())
    }
}

impl ImageSource for ImageNormalizer {
    fn normalize(&self, url: &str, suggested_name: Option<&str>, context_id: &str) -> MediaOutcome {
        if let Err(err) = fs::create_dir_all(&self.cache_dir) {
            warn!(dir = %self.cache_dir.display(), error = %err, "image cache dir unavailable");
            return MediaOutcome::Skipped(Annotation::FileError);
        }

        let name = cache_file_name(
            url,
            suggested_name,
            context_id,
            now_epoch_millis().unwrap_or_default(),
        );
        let original = self.cache_dir.join(&name);

        if is_non_empty_file(&original) {
            debug!(file = %name, "image cache hit");
        } else if let Err(err) = self.download(url, &original) {
            warn!(
                file = %name,
                url = %truncate_with_ellipsis(url, 60),
                error = %err,
                "image download failed"
            );
            let _ = fs::remove_file(&original);
            return MediaOutcome::Skipped(Annotation::DownloadFailed(name));
        }

        let (path, annotation) = match classify(&name) {
            MediaKind::Still => (original, Annotation::Plain),
            MediaKind::Video => {
                debug!(file = %name, "video frames are not extracted");
                return MediaOutcome::Skipped(Annotation::Video);
            }
            MediaKind::Animated => {
                if !GIF_FRAMES_ENABLED {
                    warn!(file = %name, "built without gif decoding; skipping animated image");
                    return MediaOutcome::Skipped(Annotation::MissingCapability);
                }
                let frame = self.cache_dir.join(frame_file_name(&name));
                if let Err(err) = extract_first_frame(&original, &frame) {
                    warn!(file = %name, error = %format!("{err:#}"), "gif frame extraction failed");
                    return MediaOutcome::Skipped(Annotation::ProcessingFailed);
                }
                (frame, Annotation::FromGif)
            }
        };

        if !is_non_empty_file(&path) {
            warn!(path = %path.display(), "normalized image missing or empty");
            return MediaOutcome::Skipped(Annotation::FileError);
        }
        MediaOutcome::Ready(NormalizedImage { path, annotation })
    }
}

#[cfg(test)]
mod tests {
    use super::{
        Annotation, ImageNormalizer, ImageSource, MediaOutcome, cache_file_name,
        extract_first_frame, frame_file_name, mime_type_for, sanitize_file_name,
    };
    use std::fs;
    use std::path::Path;
    use std::time::Duration;
    use tempfile::tempdir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const UNREACHABLE: &str = "http://127.0.0.1:9";

    fn normalizer(dir: &Path) -> ImageNormalizer {
        ImageNormalizer::new(dir.to_path_buf(), Duration::from_secs(2)).expect("normalizer")
    }

    #[test]
    fn sanitize_strips_path_illegal_chars_and_bounds_length() {
        assert_eq!(sanitize_file_name(" a/b:c*?d.jpg "), "abcd.jpg");
        let long = "x".repeat(300);
        assert_eq!(sanitize_file_name(&long).chars().count(), 200);
    }

    #[test]
    fn gateway_name_is_kept_when_specific() {
        let name = cache_file_name("https://x/y.png", Some("AB12CD.jpg"), "77", 5);
        assert_eq!(name, "AB12CD.jpg");
    }

    #[test]
    fn generic_or_extensionless_names_are_synthesized() {
        assert_eq!(
            cache_file_name("https://gchat.qpic.cn/a/b.png?term=2", Some("image"), "77", 123),
            "msg_77_123.png"
        );
        assert_eq!(
            cache_file_name("https://gchat.qpic.cn/download", Some("ABCDEF"), "77", 123),
            "msg_77_123.jpg"
        );
        assert_eq!(
            cache_file_name("https://host/file.verylongext", None, "9", 1),
            "msg_9_1.jpg"
        );
    }

    #[test]
    fn frame_name_derives_from_original_stem() {
        assert_eq!(frame_file_name("funny.gif"), "funny_frame0.png");
    }

    #[test]
    fn mime_type_falls_back_to_octet_stream() {
        assert_eq!(mime_type_for(Path::new("a.JPG")), "image/jpeg");
        assert_eq!(mime_type_for(Path::new("a_frame0.png")), "image/png");
        assert_eq!(mime_type_for(Path::new("a.bin")), "application/octet-stream");
    }

    #[test]
    fn cached_file_is_reused_without_download() {
        let tmp = tempdir().expect("tempdir");
        fs::write(tmp.path().join("cached.jpg"), b"\xff\xd8\xff").expect("seed cache");
        let normalizer = normalizer(tmp.path());

        let url = format!("{UNREACHABLE}/cached.jpg");
        let first = normalizer.normalize(&url, Some("cached.jpg"), "1");
        let second = normalizer.normalize(&url, Some("cached.jpg"), "1");

        let MediaOutcome::Ready(image) = &first else {
            panic!("expected cache hit, got {first:?}");
        };
        assert_eq!(image.path, tmp.path().join("cached.jpg"));
        assert_eq!(image.annotation, Annotation::Plain);
        assert_eq!(first, second);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn second_normalize_hits_cache_instead_of_downloading() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/pic/a.jpg"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"\xff\xd8\xffjpeg".to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let url = format!("{}/pic/a.jpg", server.uri());
        let tmp = tempdir().expect("tempdir");
        let dir = tmp.path().to_path_buf();
        let (first, second) = tokio::task::spawn_blocking(move || {
            let normalizer = normalizer(&dir);
            let first = normalizer.normalize(&url, Some("a.jpg"), "7");
            let second = normalizer.normalize(&url, Some("a.jpg"), "7");
            (first, second)
        })
        .await
        .expect("blocking task");

        let MediaOutcome::Ready(image) = &first else {
            panic!("expected download, got {first:?}");
        };
        assert_eq!(image.path, tmp.path().join("a.jpg"));
        assert_eq!(first, second);
        server.verify().await;
    }

    #[test]
    fn failed_download_leaves_no_partial_file() {
        let tmp = tempdir().expect("tempdir");
        let normalizer = normalizer(tmp.path());
        let out = normalizer.normalize(&format!("{UNREACHABLE}/x.jpg"), Some("x.jpg"), "1");
        assert_eq!(
            out,
            MediaOutcome::Skipped(Annotation::DownloadFailed("x.jpg".to_string()))
        );
        assert!(!tmp.path().join("x.jpg").exists());
    }

    #[test]
    fn cached_video_is_reported_unsupported() {
        let tmp = tempdir().expect("tempdir");
        fs::write(tmp.path().join("clip.mp4"), b"not really a video").expect("seed");
        let out = normalizer(tmp.path()).normalize(&format!("{UNREACHABLE}/clip.mp4"), Some("clip.mp4"), "1");
        assert_eq!(out, MediaOutcome::Skipped(Annotation::Video));
    }

    #[cfg(feature = "gif")]
    #[test]
    fn corrupt_gif_is_processing_failure() {
        let tmp = tempdir().expect("tempdir");
        fs::write(tmp.path().join("broken.gif"), b"GIF89a-truncated").expect("seed");
        let out = normalizer(tmp.path()).normalize(&format!("{UNREACHABLE}/b.gif"), Some("broken.gif"), "1");
        assert_eq!(out, MediaOutcome::Skipped(Annotation::ProcessingFailed));
    }

    #[cfg(feature = "gif")]
    #[test]
    fn gif_first_frame_becomes_non_palette_png() {
        let tmp = tempdir().expect("tempdir");
        let gif_path = tmp.path().join("wave.gif");
        let frame = image::RgbaImage::from_pixel(4, 3, image::Rgba([200, 30, 30, 255]));
        frame
            .save_with_format(&gif_path, image::ImageFormat::Gif)
            .expect("encode gif");

        let out = normalizer(tmp.path()).normalize(&format!("{UNREACHABLE}/wave.gif"), Some("wave.gif"), "1");
        let MediaOutcome::Ready(image) = out else {
            panic!("expected frame extraction to succeed");
        };
        assert_eq!(image.annotation, Annotation::FromGif);
        assert_eq!(image.path, tmp.path().join("wave_frame0.png"));

        let png = image::open(&image.path).expect("decode png");
        assert!(matches!(
            png.color(),
            image::ColorType::Rgba8 | image::ColorType::Rgb8
        ));
        assert_eq!((png.width(), png.height()), (4, 3));
    }

    #[test]
    fn opaque_still_image_is_written_as_rgb() {
        let tmp = tempdir().expect("tempdir");
        let src = tmp.path().join("still.png");
        image::RgbImage::from_pixel(2, 2, image::Rgb([1, 2, 3]))
            .save_with_format(&src, image::ImageFormat::Png)
            .expect("encode");
        let dest = tmp.path().join("still_frame0.png");
        extract_first_frame(&src, &dest).expect("extract");
        assert_eq!(
            image::open(&dest).expect("decode").color(),
            image::ColorType::Rgb8
        );
    }
}
