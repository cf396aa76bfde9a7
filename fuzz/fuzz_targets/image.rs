#![no_main]

use hostlink::{HostImage, Signature};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(image) = HostImage::from_mem(data.to_vec()) {
        let _ = image.exports();
        let _ = image.executable_ranges();
        if let Ok(prologue) = Signature::parse("55 8B EC ??") {
            for offset in image.find_signature(&prologue) {
                let _ = image.offset_to_rva(offset);
            }
        }
    }
});
