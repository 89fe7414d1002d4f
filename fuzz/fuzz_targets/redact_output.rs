#![no_main]

use cirp_output_sanitizer::sanitize_line;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: (&str, &str)| {
    let (text, secret) = data;
    let out = sanitize_line(text, &[secret]);

    assert!(!out.contains('\n'));
    let plain = secret.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if plain && secret.len() >= 4 && !text.contains(['\n', '\r']) {
        assert!(!out.contains(secret));
    }
});
