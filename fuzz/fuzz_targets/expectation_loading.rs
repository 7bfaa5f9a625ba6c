#![no_main]

use causeway::expectation_types::ExpectationFile;
use causeway::recognizer::RecognizerRegistry;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(input) = std::str::from_utf8(data) {
        // Parsing and validation must reject bad input without panicking
        let parsed = [
            ExpectationFile::from_json_str(input),
            ExpectationFile::from_toml_str(input),
        ];
        for file in parsed.into_iter().flatten() {
            let _ = RecognizerRegistry::build(&file);
        }
    }
});
