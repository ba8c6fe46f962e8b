/// Native tray icon and Win32 message loop
///
/// The icon must be created and pumped on the same thread. Menu clicks are
/// forwarded from the tray-icon event handler over a channel and dispatched
/// between message pumps.
use crate::tray::{dispatch, TrayAction, TrayFlow, TrayHandler, TRAY_TOOLTIP};
use anyhow::{anyhow, Result};
use crossbeam::channel::unbounded;
use image::RgbaImage;
use std::time::Duration;
use tray_icon::menu::{Menu, MenuEvent, MenuId, MenuItem, PredefinedMenuItem};
use tray_icon::{Icon, TrayIcon, TrayIconBuilder};
use windows::Win32::UI::WindowsAndMessaging::*;

/// Tray icon plus the ids of its menu items
pub struct TrayIconManager {
    #[allow(dead_code)]
    tray_icon: TrayIcon,
    items: Vec<(MenuId, TrayAction)>,
}

impl TrayIconManager {
    pub fn new(image: RgbaImage) -> Result<Self> {
        tracing::info!("Creating tray icon");

        let (width, height) = image.dimensions();
        let icon = Icon::from_rgba(image.into_raw(), width, height)
            .map_err(|e| anyhow!("Failed to create icon from image: {:?}", e))?;

        // Create context menu (appears on right-click)
        let menu = Menu::new();
        let mut items = Vec::with_capacity(TrayAction::ALL.len());
        for action in TrayAction::ALL {
            if action == TrayAction::Close {
                menu.append(&PredefinedMenuItem::separator())
                    .map_err(|e| anyhow!("Failed to add separator: {}", e))?;
            }
            let item = MenuItem::new(action.label(), true, None);
            menu.append(&item)
                .map_err(|e| anyhow!("Failed to add {:?} item: {}", action, e))?;
            items.push((item.id().clone(), action));
        }

        let tray_icon = TrayIconBuilder::new()
            .with_tooltip(TRAY_TOOLTIP)
            .with_icon(icon)
            .with_menu(Box::new(menu))
            .build()
            .map_err(|e| anyhow!("Failed to create tray icon: {}", e))?;

        tracing::info!("Tray icon created successfully with context menu");

        Ok(Self { tray_icon, items })
    }

    fn action_for(&self, id: &MenuId) -> Option<TrayAction> {
        self.items
            .iter()
            .find(|(item_id, _)| item_id == id)
            .map(|(_, action)| *action)
    }
}

/// Create the icon and pump messages until a handler asks to exit
pub fn run_tray_loop(handler: &dyn TrayHandler, image: RgbaImage) -> Result<()> {
    let tray = TrayIconManager::new(image)?;

    let (menu_tx, menu_rx) = unbounded::<MenuEvent>();
    MenuEvent::set_event_handler(Some(move |event: MenuEvent| {
        tracing::debug!("Menu event: {:?}", event);
        let _ = menu_tx.send(event);
    }));

    tracing::info!("Tray event handler set, entering message loop");

    unsafe {
        let mut msg = MSG::default();
        loop {
            // Pump Windows messages (required for tray icon events)
            while PeekMessageW(&mut msg, None, 0, 0, PM_REMOVE).as_bool() {
                if msg.message == WM_QUIT {
                    tracing::info!("WM_QUIT received, leaving tray loop");
                    return Ok(());
                }
                TranslateMessage(&msg);
                DispatchMessageW(&msg);
            }

            while let Ok(event) = menu_rx.try_recv() {
                let Some(action) = tray.action_for(&event.id) else {
                    continue;
                };
                if dispatch(handler, action) == TrayFlow::Exit {
                    MenuEvent::set_event_handler(None::<fn(MenuEvent)>);
                    return Ok(());
                }
            }

            // Small sleep to avoid busy-waiting
            std::thread::sleep(Duration::from_millis(10));
        }
    }
}
