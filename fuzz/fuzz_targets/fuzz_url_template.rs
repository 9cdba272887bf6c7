#![no_main]

use libfuzzer_sys::fuzz_target;
use modkit_fetch::template::{Params, Template, expand, resolve_reference};

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        // First line is the template, remaining lines are positional values
        let mut lines = s.lines();
        let pattern = lines.next().unwrap_or_default();
        let params = Params::positional(lines);

        let _ = expand(pattern, &params);
        let template = Template::parse(pattern);
        let _ = template.execute(&params, true);
        let _ = resolve_reference(template.base(), template.path());
    }
});
