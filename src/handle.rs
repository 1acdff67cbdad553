//! Process-wide entry point: spins up the `Registry` actor once, hands out
//! clones of its mailbox, and tears the whole actor tree down on the last
//! `close()`.
//!
//! Grounded on `context.cpp`'s `extern "C"` trio
//! (`libsubtractive_init_context`/`_close_context`/`_endpoint`) and the
//! mutex-guarded `std::atomic<Context*>` singleton it wraps: idempotent
//! init, an explicit close, and a well-known endpoint string a host can log.
//! There is no real socket here to bind, so `Handle::sender` stands in for
//! the original's ROUTER endpoint address -- `endpoint_name()` still returns
//! the same literal string for hosts that display or log it.

use std::sync::{Arc, Mutex, OnceLock, Weak};

use anyhow::Context as _;

use crate::actor::{ActorHandle, Mailbox};
use crate::hotplug::{HotplugEvent, HotplugSource, PollingHotplug};
use crate::message::Message;
use crate::registry;

/// The historical bind address, preserved as a display/log string now that
/// there is no socket layer to actually bind it to.
pub const ENDPOINT_NAME: &str = "inproc://libsubtractive/context";

/// Process-wide configuration, threaded through `Handle::init`.
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
pub struct Options {
    /// Whether to start the USB hotplug poller. Tests and embedders that
    /// drive device lifecycle manually (via direct `USBDeviceAdded`/
    /// `USBDeviceRemoved` messages) leave this `false`.
    pub init_usb: bool,
}

impl Options {
    /// Parse `Options` out of a host's JSON config file contents. Config
    /// loading itself (locating the file, watching for edits) is host
    /// packaging territory and out of scope here; this is the thin
    /// deserialize-and-report-context edge a host calls into.
    pub fn from_json(data: &str) -> anyhow::Result<Options> {
        serde_json::from_str(data).context("parsing grbl_link Options from JSON")
    }

    pub fn to_json(&self) -> anyhow::Result<String> {
        serde_json::to_string(self).context("serializing grbl_link Options to JSON")
    }
}

pub fn default_options() -> Options {
    Options { init_usb: true }
}

struct Context {
    registry: ActorHandle,
    hotplug_thread: Option<std::thread::JoinHandle<()>>,
}

impl Drop for Context {
    fn drop(&mut self) {
        let _ = self.registry.mailbox.send(Message::Shutdown);
        if let Some(hotplug_thread) = self.hotplug_thread.take() {
            let _ = hotplug_thread.join();
        }
    }
}

static SINGLETON: OnceLock<Mutex<Weak<Context>>> = OnceLock::new();

/// A cloneable reference to the running registry. Dropping the last clone
/// tears the actor tree down; `Handle::close` is the explicit spelling of
/// that for callers used to the original's paired init/close API.
#[derive(Clone)]
pub struct Handle {
    context: Arc<Context>,
}

impl Handle {
    /// Idempotent process-wide init: the first call builds the registry
    /// actor (and, if `options.init_usb`, a hotplug poller feeding it);
    /// every call after that while a `Handle` is still alive returns a
    /// clone of the same one, ignoring `options`, matching the reference's
    /// "first call wins" singleton.
    pub fn init(options: Option<Options>) -> Handle {
        let options = options.unwrap_or_else(default_options);
        let slot = SINGLETON.get_or_init(|| Mutex::new(Weak::new()));
        let mut guard = slot.lock().expect("handle singleton mutex poisoned");

        if let Some(context) = guard.upgrade() {
            return Handle { context };
        }

        let registry = registry::spawn();
        let hotplug_thread = if options.init_usb {
            Some(spawn_hotplug_bridge(registry.mailbox.clone()))
        } else {
            None
        };

        let context = Arc::new(Context {
            registry,
            hotplug_thread,
        });
        *guard = Arc::downgrade(&context);
        Handle { context }
    }

    /// Drops this handle's reference. Actual teardown happens once every
    /// clone (including ones other callers still hold) is gone.
    pub fn close(self) {
        drop(self);
    }

    /// The in-process entry point: send `Message`s here to reach the
    /// registry the way a client would have sent frames to the ROUTER
    /// socket at [`ENDPOINT_NAME`].
    pub fn sender(&self) -> Mailbox {
        self.context.registry.mailbox.clone()
    }

    pub fn endpoint_name(&self) -> &'static str {
        ENDPOINT_NAME
    }
}

/// Bridges a `HotplugSource`'s events onto the registry's mailbox as
/// `Message::USBDeviceAdded`/`USBDeviceRemoved`.
fn spawn_hotplug_bridge(registry: Mailbox) -> std::thread::JoinHandle<()> {
    let source = PollingHotplug::default();
    let events = source.events();
    std::thread::Builder::new()
        .name("hotplug-bridge".to_string())
        .spawn(move || {
            while let Ok(event) = events.recv() {
                let message = match event {
                    HotplugEvent::Added { serial, port } => Message::USBDeviceAdded {
                        usb_id: serial,
                        port,
                    },
                    HotplugEvent::Removed { serial, port } => Message::USBDeviceRemoved {
                        usb_id: serial,
                        port,
                    },
                };
                if registry.send(message).is_err() {
                    break;
                }
            }
        })
        .expect("failed to spawn hotplug bridge thread")
}

/// Optional C ABI surface for hosts that linked against the original
/// library's `extern "C"` entry points. Behind a feature since most Rust
/// embedders will use [`Handle`] directly.
#[cfg(feature = "capi")]
pub mod capi {
    use super::*;
    use std::os::raw::c_char;

    #[no_mangle]
    pub extern "C" fn libsubtractive_default_options() -> Options {
        default_options()
    }

    #[no_mangle]
    pub extern "C" fn libsubtractive_endpoint() -> *const c_char {
        static ENDPOINT_CSTR: &str = "inproc://libsubtractive/context\0";
        ENDPOINT_CSTR.as_ptr() as *const c_char
    }

    /// Leaks a `Handle` into a process-wide slot and returns an opaque
    /// pointer, mirroring the original's `void*` context pointer. Paired
    /// with [`libsubtractive_close_context`].
    #[no_mangle]
    pub extern "C" fn libsubtractive_init_context(options: *const Options) -> *mut Handle {
        let options = if options.is_null() {
            None
        } else {
            Some(unsafe { *options })
        };
        Box::into_raw(Box::new(Handle::init(options)))
    }

    /// # Safety
    /// `handle` must be a pointer returned by `libsubtractive_init_context`
    /// and not already freed.
    #[no_mangle]
    pub unsafe extern "C" fn libsubtractive_close_context(handle: *mut Handle) {
        if !handle.is_null() {
            drop(Box::from_raw(handle));
        }
    }
}
