#![no_main]

use libfuzzer_sys::fuzz_target;
use mysqltest_conn::{DsnInfo, Target};

fuzz_target!(|data: &[u8]| {
    let Ok(dsn) = std::str::from_utf8(data) else {
        return;
    };

    // Never panics, even for strings the parser rejects
    let _ = Target::from_dsn(dsn);

    if let Ok(info) = DsnInfo::parse(dsn) {
        let _ = info.target().to_string();
        let _ = info.to_config();
        let _ = info.to_tls_config();
    }
});
