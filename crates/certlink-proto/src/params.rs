//! ASCII parameter-tail helpers.
//!
//! Command payloads carry the manager's `key,value,key,value,...` tail
//! verbatim; both the CA's encoders and the DUT's handlers pick fields
//! out of it with the same rules: comma-split pairs, keys compared
//! case-insensitively (deployed test scripts mix capitalizations).

/// Extract the value following `key` in a `key,value,...` tail.
pub fn param_value<'a>(params: &'a str, key: &str) -> Option<&'a str> {
    let mut fields = params.split(',');
    while let Some(k) = fields.next() {
        let v = fields.next()?;
        if k.trim().eq_ignore_ascii_case(key) {
            return Some(v.trim());
        }
    }
    None
}
