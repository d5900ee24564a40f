use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};
use tracing::debug;

const INTERRUPT_NOTICE: &[u8] = b"\nUse 'exit' to quit the shell.\n";
const SUSPEND_NOTICE: &[u8] = b"\nSuspending shell is disabled.\n";

fn notify(msg: &[u8]) {
	unsafe { libc::write(libc::STDOUT_FILENO, msg.as_ptr() as *const libc::c_void, msg.len()) };
}

extern "C" fn on_interrupt(_: libc::c_int) {
	notify(INTERRUPT_NOTICE);
}

extern "C" fn on_suspend(_: libc::c_int) {
	notify(SUSPEND_NOTICE);
}

/// Keeps interactive interrupt and suspend from stopping the shell. The
/// handlers only print; children get default dispositions back on exec.
pub fn install_handlers() -> nix::Result<()> {
	let handlers: [(Signal, extern "C" fn(libc::c_int)); 2] = [
		(Signal::SIGINT, on_interrupt),
		(Signal::SIGTSTP, on_suspend),
	];
	for &(sig, handler) in &handlers {
		let action = SigAction::new(SigHandler::Handler(handler), SaFlags::SA_RESTART, SigSet::empty());
		unsafe { signal::sigaction(sig, &action) }?;
		debug!(?sig, "handler installed");
	}
	Ok(())
}

#[cfg(test)]
pub fn restore_defaults() {
	let action = SigAction::new(SigHandler::SigDfl, SaFlags::empty(), SigSet::empty());
	for sig in [Signal::SIGINT, Signal::SIGTSTP] {
		let _ = unsafe { signal::sigaction(sig, &action) };
	}
}
