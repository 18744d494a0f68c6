use futures::FutureExt;
use std::time::Duration;

use crate::orc::value::Value;
use crate::runtime::clock::ClockId;
use crate::runtime::site::{Site, SiteError, SiteRegistry};

fn delay(args: &[Value]) -> Result<u64, SiteError> {
    match args {
        [Value::Int(n)] if *n >= 0 => Ok(*n as u64),
        [other] => Err(SiteError::expected("a non-negative integer", other)),
        _ => Err(SiteError::arity(1, args.len())),
    }
}

pub fn register(sites: &mut SiteRegistry) {
    // real milliseconds, waited out on the runtime rather than on the scheduling thread
    sites.register(Site::threaded("Rtimer", |args| {
        let delay = delay(&args);
        async move {
            tokio::time::sleep(Duration::from_millis(delay?)).await;
            Ok::<_, SiteError>(Some(Value::Signal))
        }
        .boxed()
    }));

    sites.register(Site::timer("Vtimer", ClockId::DEFAULT));
}
