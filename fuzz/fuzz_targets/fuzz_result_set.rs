#![no_main]

use libfuzzer_sys::arbitrary::{Arbitrary, Unstructured};
use libfuzzer_sys::fuzz_target;
use mysqltest_conn::protocol::decode::{decode_column_definition, decode_row};

#[derive(Debug)]
struct ResultSetInput {
    column_count: u8,
    column: Vec<u8>,
    rows: Vec<Vec<u8>>,
}

impl<'a> Arbitrary<'a> for ResultSetInput {
    fn arbitrary(u: &mut Unstructured<'a>) -> libfuzzer_sys::arbitrary::Result<Self> {
        Ok(Self {
            column_count: u.arbitrary()?,
            column: u.arbitrary()?,
            rows: u.arbitrary()?,
        })
    }
}

fuzz_target!(|input: ResultSetInput| {
    let _ = decode_column_definition(&input.column);
    for row in &input.rows {
        let _ = decode_row(row, input.column_count as usize);
    }
});
