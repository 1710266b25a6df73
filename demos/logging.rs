//! Example demonstrating logging capabilities
//!
//! Run with JSON logging (production):
//! ```bash
//! cargo run --example logging --features logging-json
//! ```
//!
//! Run with pretty logging (development):
//! ```bash
//! cargo run --example logging --features logging-pretty
//! ```

use scoped_di::{Container, Dispose, DisposeResult, ServiceDescriptor};
use std::sync::Arc;

#[allow(dead_code)]
struct Database {
    url: String,
}

impl Dispose for Database {
    fn dispose(&self) -> DisposeResult {
        println!("  [App] Closing database connection");
        Ok(())
    }
}

#[allow(dead_code)]
struct RequestContext {
    request_id: String,
    db: Arc<Database>,
}

fn main() -> scoped_di::Result<()> {
    // JSON if logging-json is enabled, pretty otherwise
    scoped_di::logging::init();

    println!("=== scoped-di Logging Demo ===\n");

    let container = Container::new();

    container.register(
        ServiceDescriptor::singleton(|_| {
            println!("  [App] Connecting to database...");
            Ok(Arc::new(Database {
                url: "postgres://localhost/mydb".into(),
            }))
        })
        .disposable(),
    )?;

    container.add_scoped(|provider| {
        Ok(RequestContext {
            request_id: format!("req-{}", provider.scope_id()),
            db: provider.get::<Database>()?,
        })
    })?;

    // Singleton built once, against the root scope
    let _db = container.get::<Database>()?;

    // Unregistered services resolve to nothing
    assert!(container.try_get::<i32>()?.is_none());

    for _ in 0..2 {
        let scope = container.create_scope()?;
        let ctx = scope.get::<RequestContext>()?;
        println!("  [App] Handling {}", ctx.request_id);
        scope.dispose()?;
    }

    // Releases the database through its Dispose impl
    container.dispose()?;
    assert!(container.get::<Database>().is_err());

    println!("\n=== Demo Complete ===");
    println!("\nTip: Use --features logging-json for production (JSON output)");
    println!("     Use --features logging-pretty for development (colorful output)");
    Ok(())
}
