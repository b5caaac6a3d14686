use std::any::Any;

/// Extracts a readable message from a panic payload.
///
/// `panic!("literal")` carries a `&'static str`, formatted panics carry a
/// `String`; anything else is reported generically.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
	if let Some(msg) = payload.downcast_ref::<&'static str>() {
		return (*msg).to_string();
	}
	if let Some(msg) = payload.downcast_ref::<String>() {
		return msg.clone();
	}
	"non-string panic payload".to_string()
}

#[cfg(test)]
mod tests {
	use super::panic_message;

	#[test]
	fn extracts_static_str_payload() {
		let err = std::thread::spawn(|| panic!("boom-str")).join().unwrap_err();
		let msg = panic_message(err.as_ref());
		assert!(msg.contains("boom-str"), "expected 'boom-str', got: {msg}");
	}

	#[test]
	fn extracts_string_payload() {
		let err = std::thread::spawn(|| panic!("{}", String::from("boom-string"))).join().unwrap_err();
		let msg = panic_message(err.as_ref());
		assert!(msg.contains("boom-string"), "expected 'boom-string', got: {msg}");
	}

	#[test]
	fn reports_unknown_payloads_generically() {
		let err = std::thread::spawn(|| std::panic::panic_any(42u8)).join().unwrap_err();
		assert_eq!(panic_message(err.as_ref()), "non-string panic payload");
	}
}
