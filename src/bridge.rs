//! Flat native bridge exposed to the script.
//!
//! Every operation has a camelCase name and takes a positional list of JSON
//! arguments, so the script adapter needs a single entry point. Structured
//! options are decoded with serde; results come back as JSON values.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use crate::error::{HostError, HostResult};
use crate::events::{RpcInvokeSink, TrayEventSink};
use crate::options::{
    ExecOptions, MessageBoxOptions, OpenDialogOptions, SaveDialogOptions, TrayMenuItem,
    TrayOptions, WindowOptions,
};
use crate::platform::HostPlatform;
use crate::window::WindowId;

/// Names of every operation [`NativeBridge::call`] understands.
pub const OPERATIONS: &[&str] = &[
    "appQuit",
    "windowCreate",
    "windowLoadUrl",
    "windowShow",
    "windowHide",
    "windowClose",
    "windowSetTitle",
    "windowGetSize",
    "windowGetPosition",
    "windowFocus",
    "windowCenter",
    "windowMinimize",
    "windowUnminimize",
    "windowIsMinimized",
    "windowMaximize",
    "windowUnmaximize",
    "windowIsMaximized",
    "windowSetRpcManifest",
    "windowRpcResolve",
    "windowRpcReject",
    "trayCreate",
    "traySetToolTip",
    "traySetMenu",
    "dialogOpenFile",
    "dialogSaveFile",
    "dialogMessageBox",
    "shellOpenExternal",
    "shellOpenPath",
    "shellRevealPath",
    "shellTrashPath",
    "pathJoin",
    "pathResolve",
    "pathGetUserData",
    "pathGetLocalData",
    "pathGetTemp",
    "pathGetCwd",
    "pathGetBaseExeDir",
    "fsReadText",
    "fsWriteText",
    "fsAppendText",
    "fsExists",
    "fsMkdir",
    "fsReadDir",
    "fsRemove",
    "processExec",
];

/// Positional arguments of one bridge call.
struct Args<'a> {
    operation: &'a str,
    values: &'a [Value],
}

impl<'a> Args<'a> {
    fn get(&self, index: usize) -> &Value {
        self.values.get(index).unwrap_or(&Value::Null)
    }

    fn invalid(&self, index: usize, expected: &str) -> HostError {
        HostError::InvalidArgument(format!(
            "{}: argument {} must be {expected}",
            self.operation,
            index + 1
        ))
    }

    fn window(&self, index: usize) -> HostResult<WindowId> {
        self.get(index)
            .as_u64()
            .and_then(|id| u32::try_from(id).ok())
            .map(WindowId)
            .ok_or_else(|| self.invalid(index, "a window id"))
    }

    fn id(&self, index: usize) -> HostResult<u32> {
        self.get(index)
            .as_u64()
            .and_then(|id| u32::try_from(id).ok())
            .ok_or_else(|| self.invalid(index, "an id"))
    }

    fn string(&self, index: usize) -> HostResult<String> {
        match self.get(index) {
            Value::String(text) => Ok(text.clone()),
            _ => Err(self.invalid(index, "a string")),
        }
    }

    fn optional_string(&self, index: usize) -> HostResult<Option<String>> {
        match self.get(index) {
            Value::Null => Ok(None),
            Value::String(text) => Ok(Some(text.clone())),
            _ => Err(self.invalid(index, "a string or null")),
        }
    }

    fn flag(&self, index: usize) -> bool {
        self.get(index).as_bool().unwrap_or(false)
    }

    fn strings(&self, index: usize) -> HostResult<Vec<String>> {
        match self.get(index) {
            Value::Null => Ok(Vec::new()),
            Value::Array(items) => items
                .iter()
                .map(|item| {
                    item.as_str()
                        .map(str::to_string)
                        .ok_or_else(|| self.invalid(index, "a list of strings"))
                })
                .collect(),
            _ => Err(self.invalid(index, "a list of strings")),
        }
    }

    /// Decode a structured argument; a missing one means all defaults.
    fn options<T: DeserializeOwned + Default>(&self, index: usize) -> HostResult<T> {
        match self.get(index) {
            Value::Null => Ok(T::default()),
            value => serde_json::from_value(value.clone()).map_err(HostError::from),
        }
    }

    fn optional_window(&self, index: usize) -> HostResult<Option<WindowId>> {
        match self.get(index) {
            Value::Null => Ok(None),
            _ => self.window(index).map(Some),
        }
    }

    /// All arguments as strings, for variadic path operations.
    fn all_strings(&self) -> HostResult<Vec<String>> {
        if let [Value::Array(_)] = self.values {
            return self.strings(0);
        }
        (0..self.values.len()).map(|i| self.string(i)).collect()
    }
}

/// The script-facing surface of a [`HostPlatform`].
#[derive(Clone)]
pub struct NativeBridge {
    platform: Arc<dyn HostPlatform>,
}

impl NativeBridge {
    pub fn new(platform: Arc<dyn HostPlatform>) -> Self {
        Self { platform }
    }

    pub fn platform(&self) -> &Arc<dyn HostPlatform> {
        &self.platform
    }

    pub fn tray_on_event(&self, sink: Option<TrayEventSink>) {
        self.platform.set_tray_event_sink(sink);
    }

    pub fn window_on_rpc_invoke(&self, sink: Option<RpcInvokeSink>) {
        self.platform.set_rpc_invoke_sink(sink);
    }

    /// Run one named operation. Routine conditions (a missing directory,
    /// an unknown window) produce ordinary results; only real failures are
    /// errors.
    pub fn call(&self, operation: &str, args: &[Value]) -> HostResult<Value> {
        let args = Args {
            operation,
            values: args,
        };
        let p = &self.platform;
        tracing::trace!(operation, "bridge call");

        let value = match operation {
            "appQuit" => {
                p.quit(0);
                Value::Null
            }

            "windowCreate" => {
                let options: WindowOptions = args.options(0)?;
                json!(p.create_window(options)?.0)
            }
            "windowLoadUrl" => {
                p.load_url(args.window(0)?, &args.string(1)?);
                Value::Null
            }
            "windowShow" => unit(p.show_window(args.window(0)?)),
            "windowHide" => unit(p.hide_window(args.window(0)?)),
            "windowClose" => unit(p.close_window(args.window(0)?)),
            "windowSetTitle" => unit(p.set_window_title(args.window(0)?, &args.string(1)?)),
            "windowGetSize" => {
                let size = p.window_size(args.window(0)?);
                json!([size.width, size.height])
            }
            "windowGetPosition" => {
                let position = p.window_position(args.window(0)?);
                json!([position.x, position.y])
            }
            "windowFocus" => unit(p.focus_window(args.window(0)?)),
            "windowCenter" => unit(p.center_window(args.window(0)?)),
            "windowMinimize" => unit(p.minimize_window(args.window(0)?)),
            "windowUnminimize" => unit(p.unminimize_window(args.window(0)?)),
            "windowIsMinimized" => json!(p.is_window_minimized(args.window(0)?)),
            "windowMaximize" => unit(p.maximize_window(args.window(0)?)),
            "windowUnmaximize" => unit(p.unmaximize_window(args.window(0)?)),
            "windowIsMaximized" => json!(p.is_window_maximized(args.window(0)?)),
            "windowSetRpcManifest" => unit(p.set_rpc_manifest(
                args.window(0)?,
                args.optional_string(1)?,
                args.strings(2)?,
            )),
            "windowRpcResolve" => {
                let result_json = args.optional_string(2)?.unwrap_or_default();
                json!(p.rpc_resolve(args.window(0)?, &args.string(1)?, &result_json))
            }
            "windowRpcReject" => {
                json!(p.rpc_reject(args.window(0)?, &args.string(1)?, &args.string(2)?))
            }

            "trayCreate" => {
                let options: TrayOptions = args.options(0)?;
                json!(p.create_tray(options)?)
            }
            "traySetToolTip" => {
                p.set_tray_tooltip(args.id(0)?, &args.string(1)?)?;
                Value::Null
            }
            "traySetMenu" => {
                let menu: Vec<TrayMenuItem> = args.options(1)?;
                p.set_tray_menu(args.id(0)?, menu)?;
                Value::Null
            }

            "dialogOpenFile" => {
                let options: OpenDialogOptions = args.options(0)?;
                json!(p.open_file_dialog(args.optional_window(1)?, options)?)
            }
            "dialogSaveFile" => {
                let options: SaveDialogOptions = args.options(0)?;
                json!(p.save_file_dialog(args.optional_window(1)?, options)?)
            }
            "dialogMessageBox" => {
                let options: MessageBoxOptions = args.options(0)?;
                serde_json::to_value(p.message_box(args.optional_window(1)?, options)?)?
            }

            "shellOpenExternal" => unit(p.open_external(&args.string(0)?)?),
            "shellOpenPath" => unit(p.open_path(&args.string(0)?)?),
            "shellRevealPath" => unit(p.reveal_path(&args.string(0)?)?),
            "shellTrashPath" => unit(p.trash_path(&args.string(0)?)?),

            "pathJoin" => json!(p.join_path(&args.all_strings()?)),
            "pathResolve" => json!(p.resolve_path(&args.all_strings()?)?),
            "pathGetUserData" => json!(p.user_data_path()?),
            "pathGetLocalData" => json!(p.local_data_path()?),
            "pathGetTemp" => json!(p.temp_path()),
            "pathGetCwd" => json!(p.current_dir()?),
            "pathGetBaseExeDir" => json!(p.base_exe_dir()?),

            "fsReadText" => json!(p.read_text(&args.string(0)?)?),
            "fsWriteText" => unit(p.write_text(&args.string(0)?, &args.string(1)?)?),
            "fsAppendText" => unit(p.append_text(&args.string(0)?, &args.string(1)?)?),
            "fsExists" => json!(p.path_exists(&args.string(0)?)),
            "fsMkdir" => unit(p.create_dir(&args.string(0)?, args.flag(1))?),
            "fsReadDir" => json!(p.read_dir(&args.string(0)?)?),
            "fsRemove" => unit(p.remove_path(&args.string(0)?, args.flag(1))?),

            "processExec" => {
                let options: ExecOptions = args.options(0)?;
                serde_json::to_value(p.exec(&options))?
            }

            other => {
                return Err(HostError::InvalidArgument(format!(
                    "Unknown bridge operation: {other}"
                )))
            }
        };
        Ok(value)
    }
}

fn unit(_: ()) -> Value {
    Value::Null
}
