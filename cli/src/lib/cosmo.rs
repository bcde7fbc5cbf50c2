//! Glue between the CLI and the embedding API: building a [`cosmo::State`]
//! and rendering whatever it leaves on the stack after a failed `pcall`.

use cosmo::{CosmoError, ErrorPayload, State, Value};

/// A fresh VM with the base library loaded, the way `cosmoV_newState` +
/// `cosmoB_loadlibrary` are always paired in the reference CLI.
pub fn build_state() -> State {
  State::new()
}

/// Turns whatever `pcall` left on top of the stack into the same rendering
/// `CosmoError::render` produces, whether that's an `Error` object raised
/// by the VM or a bare value thrown by `error(v)`.
pub fn render_error(top: Value) -> String {
  match top.as_gc().and_then(|g| g.as_error()) {
    Some(e) => CosmoError::Runtime {
      payload: ErrorPayload::Value(e.payload),
      trace: e.trace.clone(),
    }
    .render(),
    None => top.to_string(),
  }
}

/// Prints a compile error to stderr, using color when stderr supports it.
pub fn report_compile_error(err: &CosmoError) {
  let color = supports_color::on(supports_color::Stream::Stderr)
    .map(|c| c.has_basic)
    .unwrap_or(false);
  if color {
    eprintln!("\x1b[31m{}\x1b[0m", err.render());
  } else {
    eprintln!("{}", err.render());
  }
}
