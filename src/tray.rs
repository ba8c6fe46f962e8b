/// System tray wiring
///
/// The tray offers three fixed items. This module holds the part that does
/// not depend on the OS toolkit: the menu model, the handler the items call,
/// the actions bound to the lifecycle controller, and the tray image.
/// The native icon and message loop live in `tray_icon` (Windows only).
use crate::lifecycle::LifecycleController;
use anyhow::{anyhow, Result};
use crossbeam::channel::Sender;
use image::{Rgba, RgbaImage};
use std::path::Path;
use std::sync::Arc;

pub const TRAY_TOOLTIP: &str = "DETool.APP";
pub const ICON_FILE_NAME: &str = "icon.png";
pub const FALLBACK_ICON_SIZE: u32 = 64;
const FALLBACK_ICON_FILL: Rgba<u8> = Rgba([0, 123, 255, 255]);
const FALLBACK_ICON_BACKGROUND: Rgba<u8> = Rgba([0, 0, 0, 255]);

/// Items of the tray context menu, in display order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrayAction {
    Open,
    Restart,
    Close,
}

impl TrayAction {
    pub const ALL: [TrayAction; 3] = [TrayAction::Open, TrayAction::Restart, TrayAction::Close];

    pub fn label(self) -> &'static str {
        match self {
            TrayAction::Open => "Open DETool.APP",
            TrayAction::Restart => "Restart Server",
            TrayAction::Close => "Close Server",
        }
    }
}

/// Whether the tray loop keeps running after an action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrayFlow {
    Continue,
    Exit,
}

/// Callbacks behind the tray menu items
pub trait TrayHandler {
    fn on_open(&self);
    fn on_restart(&self);
    fn on_exit(&self);
}

/// Run the handler for one menu action
pub fn dispatch(handler: &dyn TrayHandler, action: TrayAction) -> TrayFlow {
    tracing::info!("Tray menu clicked: {}", action.label());
    match action {
        TrayAction::Open => {
            handler.on_open();
            TrayFlow::Continue
        }
        TrayAction::Restart => {
            handler.on_restart();
            TrayFlow::Continue
        }
        TrayAction::Close => {
            handler.on_exit();
            TrayFlow::Exit
        }
    }
}

/// Why the main thread was woken up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitRequest {
    /// "Close Server" was picked; the server is already stopped
    TrayClose,
    /// Ctrl+C
    Interrupt,
}

/// Opens a URL in the user's browser
pub type BrowserOpener = Box<dyn Fn(&str) -> std::io::Result<()> + Send + Sync>;

/// Tray callbacks bound to the lifecycle controller
pub struct ServerTrayActions {
    controller: Arc<LifecycleController>,
    app_url: String,
    exit_tx: Sender<ExitRequest>,
    opener: BrowserOpener,
}

impl ServerTrayActions {
    pub fn new(
        controller: Arc<LifecycleController>,
        app_url: impl Into<String>,
        exit_tx: Sender<ExitRequest>,
    ) -> Self {
        Self::with_opener(controller, app_url, exit_tx, Box::new(|url: &str| open::that(url)))
    }

    pub fn with_opener(
        controller: Arc<LifecycleController>,
        app_url: impl Into<String>,
        exit_tx: Sender<ExitRequest>,
        opener: BrowserOpener,
    ) -> Self {
        Self {
            controller,
            app_url: app_url.into(),
            exit_tx,
            opener,
        }
    }
}

impl TrayHandler for ServerTrayActions {
    fn on_open(&self) {
        // Fire and forget
        if let Err(e) = (self.opener)(&self.app_url) {
            tracing::warn!("Failed to open {}: {}", self.app_url, e);
        }
    }

    fn on_restart(&self) {
        if let Err(e) = self.controller.restart() {
            tracing::error!("Error restarting server: {}", e);
        }
    }

    fn on_exit(&self) {
        if let Err(e) = self.controller.shutdown() {
            tracing::error!("Error shutting down server: {}", e);
        }
        let _ = self.exit_tx.send(ExitRequest::TrayClose);
    }
}

/// Load `icon.png` if present, otherwise draw the fallback icon
pub fn load_tray_image(icon_dir: Option<&Path>) -> RgbaImage {
    let Some(path) = icon_dir.map(|dir| dir.join(ICON_FILE_NAME)) else {
        return fallback_icon();
    };

    if !path.exists() {
        return fallback_icon();
    }

    match decode_icon(&path) {
        Ok(image) => image,
        Err(e) => {
            tracing::warn!("{}; using fallback icon", e);
            fallback_icon()
        }
    }
}

fn decode_icon(path: &Path) -> Result<RgbaImage> {
    let image = image::open(path)
        .map_err(|e| anyhow!("Failed to decode {:?}: {}", path, e))?;
    Ok(image.to_rgba8())
}

/// Blue disc on a black square
pub fn fallback_icon() -> RgbaImage {
    let size = FALLBACK_ICON_SIZE;
    let radius = size as f32 / 2.0;
    RgbaImage::from_fn(size, size, |x, y| {
        let dx = x as f32 + 0.5 - radius;
        let dy = y as f32 + 0.5 - radius;
        if dx * dx + dy * dy <= radius * radius {
            FALLBACK_ICON_FILL
        } else {
            FALLBACK_ICON_BACKGROUND
        }
    })
}

/// Run the tray loop on the calling thread until "Close Server" is picked
#[cfg(windows)]
pub fn run(handler: &dyn TrayHandler, icon_dir: Option<&Path>) -> Result<()> {
    crate::tray_icon::run_tray_loop(handler, load_tray_image(icon_dir))
}

#[cfg(not(windows))]
pub fn run(_handler: &dyn TrayHandler, _icon_dir: Option<&Path>) -> Result<()> {
    tracing::warn!("System tray is not available on this platform; press Ctrl+C to stop");
    Ok(())
}
