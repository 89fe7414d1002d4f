#![no_main]

use cirp::config::TagConfig;
use cirp::tags::{LatestTag, NumberedTag, StoreTag, TagCodec, TagReleaseTag};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &str| {
    let tags = TagConfig::default();

    // Whatever a decoder accepts must re-encode to the exact same tag.
    let latest = LatestTag::new(&tags);
    if let Some(branch) = latest.decode(data) {
        assert_eq!(latest.encode(&branch), data);
    }
    if let Some(branch) = latest.decode_tmp(data) {
        assert_eq!(latest.encode_tmp(&branch), data);
    }

    let numbered = NumberedTag::new(&tags);
    if let Some(key) = numbered.decode(data) {
        assert_eq!(numbered.encode(&key), data);
    }
    if let Some(key) = numbered.decode_tmp(data) {
        assert_eq!(numbered.encode_tmp(&key), data);
    }

    let store = StoreTag::new(&tags);
    if let Some(key) = store.decode(data) {
        assert_eq!(store.encode(&key), data);
    }

    let tag_release = TagReleaseTag::new(&tags);
    if let Some(tag) = tag_release.decode_tmp(data) {
        assert_eq!(tag_release.encode_tmp(&tag), data);
    }
});
