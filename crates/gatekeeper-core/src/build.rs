//! Build/version info surfaced on `/health` and `/ready`.

#[derive(Debug, Clone, serde::Serialize)]
pub struct BuildInfo {
	pub version: &'static str,
}

impl BuildInfo {
	pub fn current() -> Self {
		Self {
			version: env!("CARGO_PKG_VERSION"),
		}
	}
}
