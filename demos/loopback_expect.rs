//! Expect engine walkthrough over the in-memory loopback transport.
//!
//! No remote host needed: writes echo straight back as reads, which is
//! enough to show immediate matches, declaration-order tie-breaking, and
//! the begin/end completion style.
//!
//! # Usage
//!
//! ```bash
//! cargo run --example loopback_expect
//! ```

use std::time::Duration;

use shellstream::transport::mem;
use shellstream::{ExpectAction, ShellStream, StreamConfig};

#[tokio::main]
async fn main() -> Result<(), shellstream::Error> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let stream = ShellStream::new(mem::loopback(16), StreamConfig::default());
    stream.start()?;

    // A written line comes straight back and read_line strips the terminator.
    stream.write_line("hello").await?;
    println!("read_line: {:?}", stream.read_line().await?);

    // Declaration order governs: "error" is declared first, so it wins even
    // though "success" appears earlier in the data.
    stream.write("deploy: success, 1 error\n").await?;
    let matched = stream
        .expect(vec![
            ExpectAction::literal("error", |text| println!("error action saw: {text:?}")),
            ExpectAction::literal("success", |text| println!("success action saw: {text:?}")),
        ])
        .await?;
    println!("pattern {} matched", matched.pattern_index);

    // Begin/end style: register now, collect later.
    let mut op = stream.begin_expect(vec![ExpectAction::literal("done", |_| {})])?;
    stream.write("work work done").await?;
    println!("end_expect: {:?}", stream.end_expect(&mut op).await?);

    // Timeouts are silent: nothing matches, None comes back.
    let quiet = stream
        .expect_text("never arrives", Duration::from_millis(200))
        .await?;
    println!("timed out expect: {quiet:?}");

    stream.stop()?;
    Ok(())
}
