//! Run a small source → scale → recorder application and print what the
//! recorder saw, followed by a JSON dump of the graph.
//!
//! Usage: cargo run --example pipeline [config.toml] [iterations]

use std::time::Duration;
use stepgraph::prelude::*;

struct Doubling {
    log: RecordLog,
}

impl Application for Doubling {
    fn name(&self) -> &str {
        "doubling"
    }

    fn define(&mut self, ctx: &ExecutionContext, params: &ParameterSet) -> Result<Composite> {
        let factor = params.get_float("factor").unwrap_or(2.0);
        let ramp = params.get_float("ramp").unwrap_or(1.0);

        let mut graph = Composite::new("doubling").with_failure_policy(ctx.config().execution.failure_policy);
        let src = graph.add_block(Step::from_prototype(
            "source",
            VectorSource::new(vec![1.0, 2.0, 3.0])?.with_ramp(ramp),
        ))?;
        let scale = graph.add_block(Step::from_prototype("scale", Scale::new(3, factor)?))?;
        let sink = graph.add_block(Step::from_prototype(
            "sink",
            Recorder::new(3, self.log.clone())?.with_delay(Duration::from_millis(1)),
        ))?;
        graph.connect(
            src,
            0,
            scale,
            0,
            Connection::new("source-scale", Box::new(MemoryChannel::new(ctx, "source-scale"))),
        )?;
        graph.connect(
            scale,
            0,
            sink,
            0,
            Connection::new("scale-sink", Box::new(SharedMemoryChannel::new(ctx, "scale-sink"))),
        )?;
        Ok(graph)
    }
}

fn main() -> anyhow::Result<()> {
    let mut args = std::env::args().skip(1);
    let config = match args.next() {
        Some(path) => FrameworkConfig::load(path)?,
        None => FrameworkConfig::default(),
    };
    let iterations = args.next().map(|n| n.parse::<u64>()).transpose()?.unwrap_or(5);

    let _guard = stepgraph::logging::init(&config.logging)?;
    let ctx = ExecutionContext::new(config)?;

    let log = RecordLog::new();
    let mut holder = ApplicationHolder::new(Doubling { log: log.clone() }, ctx);
    holder.define(ParameterSet::new().with("factor", 2.0))?;
    holder.init()?;
    let completed = holder.run(iterations)?;

    for record in log.records() {
        println!("pass {:>3}: {:?}", record.iteration, record.values);
    }
    if let Some(composite) = holder.composite() {
        println!("{}", composite.dump_json()?);
    }
    holder.quit()?;

    tracing::info!(completed, "demo finished");
    Ok(())
}
