// Path and filename constants
pub const DEFAULT_DOCKERFILE_NAME: &str = "Dockerfile";
pub const DOCKERFILE_NAME_FALLBACK: &str = "dockerfile";

/// Dockerfile size limit after context extraction (§6).
pub const MAX_DOCKERFILE_SIZE: u64 = 10 * 1024 * 1024;

/// Recursion cap on symlink resolution in the Path Resolver (§4.1).
pub const MAX_SYMLINK_RESOLUTIONS: usize = 20;

/// PATH injected into `RUN` environments when the image config doesn't set one.
pub const DEFAULT_PATH_ENV: &str =
    "PATH=/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";

/// Build-args that are implicitly declared in every build and never required to
/// appear in an `ARG` instruction (§3 BuildArgs).
pub const BUILTIN_ARGS: &[&str] = &[
    "HTTP_PROXY",
    "http_proxy",
    "HTTPS_PROXY",
    "https_proxy",
    "FTP_PROXY",
    "ftp_proxy",
    "NO_PROXY",
    "no_proxy",
];

pub const OS: &str = "linux";
pub const ARCHITECTURE: &str = "amd64";
