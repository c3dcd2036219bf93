//! F8 stop hotkey
//!
//! Registers a global F8 hotkey on its own thread and pumps Win32 messages
//! there, which the global-hotkey crate requires on Windows.

use anyhow::{anyhow, Result};
use global_hotkey::hotkey::{Code, HotKey};
use global_hotkey::{GlobalHotKeyEvent, GlobalHotKeyManager, HotKeyState};
use std::thread;
use std::time::Duration;
use swarm_launcher_core::StopSignal;
use tracing::{debug, info, warn};
use windows::Win32::UI::WindowsAndMessaging::{
    DispatchMessageW, PeekMessageW, TranslateMessage, MSG, PM_REMOVE,
};

/// Start the hotkey thread; failure to register only loses the hotkey
pub fn spawn_stop_hotkey(stop: StopSignal) {
    let spawned = thread::Builder::new()
        .name("stop-hotkey".into())
        .spawn(move || {
            if let Err(e) = run_stop_hotkey(stop) {
                warn!("F8 stop hotkey unavailable: {:#}", e);
            }
        });

    if let Err(e) = spawned {
        warn!("Failed to start hotkey thread: {}", e);
    }
}

fn run_stop_hotkey(stop: StopSignal) -> Result<()> {
    let manager = GlobalHotKeyManager::new()
        .map_err(|e| anyhow!("Failed to create hotkey manager: {:?}", e))?;
    let hotkey = HotKey::new(None, Code::F8);
    manager
        .register(hotkey)
        .map_err(|e| anyhow!("Failed to register F8: {:?}", e))?;

    info!("Press F8 to stop");
    let receiver = GlobalHotKeyEvent::receiver();

    unsafe {
        let mut msg = MSG::default();
        loop {
            while PeekMessageW(&mut msg, None, 0, 0, PM_REMOVE).as_bool() {
                let _ = TranslateMessage(&msg);
                DispatchMessageW(&msg);
            }

            while let Ok(event) = receiver.try_recv() {
                debug!("Hotkey event received: {:?}", event);
                if event.id == hotkey.id() && event.state == HotKeyState::Pressed {
                    info!("F8 pressed, stopping");
                    stop.request();
                }
            }

            thread::sleep(Duration::from_millis(10));
        }
    }
}
