#![forbid(unsafe_code)]

// Native-only runner. The workspace is also built for `wasm32-unknown-unknown` to keep the
// scheduler crate wasm-compatible, so provide a stub `main` there.
#[cfg(target_arch = "wasm32")]
fn main() {}

#[cfg(not(target_arch = "wasm32"))]
mod native {
    use std::fs;
    use std::io::{self, Write};
    use std::path::PathBuf;
    use std::time::Instant;

    use anyhow::{bail, Context, Result};
    use cadence_sched::{
        CycleBudget, Host, ProcessorId, ProcessorSpec, RunExit, Scheduler, SchedulerConfig,
        Seconds, Slice, SuspendReason, TimerAction, TimerHandle,
    };
    use clap::Parser;
    use serde::{Deserialize, Serialize};
    use tracing::{debug, info};
    use tracing_subscriber::EnvFilter;

    #[derive(Debug, Parser)]
    #[command(
        name = "cadence",
        about = "Runs synthetic processors under the virtual-time scheduler and reports what ran"
    )]
    pub struct Args {
        /// JSON run description (`scheduler`, `processors`, `timers`, `duration`).
        #[arg(long, conflicts_with_all = ["cpu", "pulse"])]
        config: Option<PathBuf>,

        /// Add a processor clocked at HZ cycles per second (repeatable).
        #[arg(long = "cpu", value_name = "HZ")]
        cpu: Vec<f64>,

        /// Add a periodic timer firing every SECONDS (repeatable).
        #[arg(long = "pulse", value_name = "SECONDS")]
        pulse: Vec<f64>,

        /// Cycles charged per synthetic instruction on `--cpu` processors.
        #[arg(long, default_value_t = 1)]
        cycles_per_insn: u32,

        /// Virtual seconds to run. Overrides `duration` from `--config`.
        #[arg(long)]
        duration: Option<Seconds>,

        /// Print the summary as JSON instead of text.
        #[arg(long)]
        json: bool,
    }

    #[derive(Debug, Default, Deserialize)]
    #[serde(deny_unknown_fields)]
    struct RunConfig {
        #[serde(default)]
        scheduler: SchedulerConfig,
        processors: Vec<ProcessorConfig>,
        #[serde(default)]
        timers: Vec<TimerConfig>,
        #[serde(default)]
        duration: Option<Seconds>,
    }

    #[derive(Debug, Deserialize)]
    #[serde(deny_unknown_fields)]
    struct ProcessorConfig {
        clock_hz: f64,
        #[serde(default = "default_overclock")]
        overclock: f64,
        #[serde(default = "default_cycles_per_insn")]
        cycles_per_insn: u32,
        /// Yield the rest of the timeslice after this many instructions of each burst.
        #[serde(default)]
        yield_after: Option<u64>,
    }

    fn default_overclock() -> f64 {
        1.0
    }

    fn default_cycles_per_insn() -> u32 {
        1
    }

    #[derive(Debug, Deserialize)]
    #[serde(deny_unknown_fields)]
    struct TimerConfig {
        name: String,
        /// Zero for a one-shot.
        period: Seconds,
        /// First expiry, relative to the start. Defaults to `period`.
        #[serde(default)]
        delay: Option<Seconds>,
    }

    /// Synthetic interpreters: every instruction costs a fixed number of cycles.
    struct Bench {
        budgets: Vec<CycleBudget>,
        cycles_per_insn: Vec<i64>,
        yield_after: Vec<Option<u64>>,
        instructions: Vec<u64>,
        slices: u64,
        fired: Vec<u64>,
    }

    impl Host<usize> for Bench {
        fn execute(&mut self, sched: &mut Scheduler<usize>, slice: Slice) -> u64 {
            let p = slice.processor;
            let budget = &self.budgets[p];
            let cost = self.cycles_per_insn[p];
            let mut run = 0u64;
            while !budget.is_exhausted() {
                budget.consume(cost);
                run += 1;
                if self.yield_after[p] == Some(run) {
                    sched.yield_processor(p);
                }
            }
            self.instructions[p] += run;
            self.slices += 1;
            (slice.cycles as i64 - budget.get()).max(0) as u64
        }

        fn timer_fired(
            &mut self,
            _sched: &mut Scheduler<usize>,
            _timer: TimerHandle,
            event: &usize,
        ) -> TimerAction {
            self.fired[*event] += 1;
            TimerAction::Default
        }
    }

    #[derive(Debug, Serialize)]
    struct Summary {
        exit: &'static str,
        final_time: Seconds,
        slices: u64,
        host_seconds: f64,
        processors: Vec<ProcessorSummary>,
        timers: Vec<TimerSummary>,
    }

    #[derive(Debug, Serialize)]
    struct ProcessorSummary {
        index: ProcessorId,
        clock_hz: f64,
        overclock: f64,
        cycles: u64,
        instructions: u64,
        time: Seconds,
    }

    #[derive(Debug, Serialize)]
    struct TimerSummary {
        name: String,
        period: Seconds,
        fired: u64,
    }

    pub fn main() -> Result<()> {
        let args = Args::parse();
        init_tracing();

        let (run, duration) = load_run_config(&args)?;
        let specs: Vec<_> = run
            .processors
            .iter()
            .map(|p| ProcessorSpec::new(p.clock_hz).with_overclock(p.overclock))
            .collect();
        let mut sched: Scheduler<usize> = Scheduler::new(run.scheduler.clone(), &specs)
            .context("invalid scheduler configuration")?;
        for p in 0..specs.len() {
            sched.hold(p, SuspendReason::RESET, false);
        }
        for (index, timer) in run.timers.iter().enumerate() {
            let handle = sched
                .alloc_timer(index)
                .with_context(|| format!("failed to allocate timer `{}`", timer.name))?;
            let delay = timer.delay.unwrap_or(timer.period);
            sched.adjust_timer(handle, delay, index, timer.period);
        }

        let mut bench = Bench {
            budgets: (0..specs.len()).map(|p| sched.budget(p)).collect(),
            cycles_per_insn: run
                .processors
                .iter()
                .map(|p| i64::from(p.cycles_per_insn))
                .collect(),
            yield_after: run.processors.iter().map(|p| p.yield_after).collect(),
            instructions: vec![0; specs.len()],
            slices: 0,
            fired: vec![0; run.timers.len()],
        };

        info!(
            processors = specs.len(),
            timers = run.timers.len(),
            duration,
            "starting run"
        );
        let started = Instant::now();
        let exit = sched
            .run_until(&mut bench, duration)
            .context("scheduler run failed")?;
        let host_seconds = started.elapsed().as_secs_f64();
        debug!(?exit, host_seconds, "run finished");

        let summary = Summary {
            exit: match exit {
                RunExit::Deadline => "deadline",
                RunExit::Stopped => "stopped",
                RunExit::Stalled => "stalled",
            },
            final_time: sched.now(),
            slices: bench.slices,
            host_seconds,
            processors: specs
                .iter()
                .enumerate()
                .map(|(index, spec)| ProcessorSummary {
                    index,
                    clock_hz: spec.clock_hz,
                    overclock: sched.get_overclock(index),
                    cycles: sched.total_cycles(index),
                    instructions: bench.instructions[index],
                    time: sched.processor_time(index),
                })
                .collect(),
            timers: run
                .timers
                .iter()
                .zip(&bench.fired)
                .map(|(timer, &fired)| TimerSummary {
                    name: timer.name.clone(),
                    period: timer.period,
                    fired,
                })
                .collect(),
        };

        let stdout = io::stdout();
        let mut out = stdout.lock();
        if args.json {
            serde_json::to_writer_pretty(&mut out, &summary)
                .context("failed to write JSON summary")?;
            writeln!(out)?;
        } else {
            write_text_summary(&mut out, &summary)?;
        }
        out.flush()?;
        Ok(())
    }

    fn init_tracing() {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(io::stderr)
            .init();
    }

    fn load_run_config(args: &Args) -> Result<(RunConfig, Seconds)> {
        let mut run = match &args.config {
            Some(path) => {
                let text = fs::read_to_string(path)
                    .with_context(|| format!("failed to read run config: {}", path.display()))?;
                serde_json::from_str::<RunConfig>(&text)
                    .with_context(|| format!("failed to parse run config: {}", path.display()))?
            }
            None => RunConfig {
                processors: args
                    .cpu
                    .iter()
                    .map(|&clock_hz| ProcessorConfig {
                        clock_hz,
                        overclock: default_overclock(),
                        cycles_per_insn: args.cycles_per_insn,
                        yield_after: None,
                    })
                    .collect(),
                timers: args
                    .pulse
                    .iter()
                    .enumerate()
                    .map(|(i, &period)| TimerConfig {
                        name: format!("pulse{i}"),
                        period,
                        delay: None,
                    })
                    .collect(),
                ..RunConfig::default()
            },
        };
        if args.duration.is_some() {
            run.duration = args.duration;
        }

        if run.processors.is_empty() {
            bail!("no processors configured (use --cpu or --config)");
        }
        if run.processors.iter().any(|p| p.cycles_per_insn == 0) {
            bail!("cycles_per_insn must be at least 1");
        }
        for timer in &run.timers {
            if !(timer.period >= 0.0) || !timer.period.is_finite() {
                bail!("timer `{}` has an invalid period {}", timer.name, timer.period);
            }
            match timer.delay {
                Some(delay) if !(delay >= 0.0) || !delay.is_finite() => {
                    bail!("timer `{}` has an invalid delay {}", timer.name, delay);
                }
                None if timer.period == 0.0 => {
                    bail!("one-shot timer `{}` needs a delay", timer.name);
                }
                _ => {}
            }
        }
        let duration = match run.duration {
            Some(duration) if duration > 0.0 && duration.is_finite() => duration,
            Some(duration) => bail!("invalid duration {duration}"),
            None => bail!("no duration given (use --duration or `duration` in --config)"),
        };
        Ok((run, duration))
    }

    fn write_text_summary(out: &mut impl Write, summary: &Summary) -> io::Result<()> {
        writeln!(out, "exit: {}", summary.exit)?;
        writeln!(out, "virtual time: {:.9} s", summary.final_time)?;
        writeln!(
            out,
            "slices: {} ({:.3} s host)",
            summary.slices, summary.host_seconds
        )?;
        for p in &summary.processors {
            writeln!(
                out,
                "cpu{}: {} Hz x{}: {} cycles, {} instructions, at {:.9} s",
                p.index, p.clock_hz, p.overclock, p.cycles, p.instructions, p.time
            )?;
        }
        for t in &summary.timers {
            writeln!(
                out,
                "timer {} (period {} s): fired {}",
                t.name, t.period, t.fired
            )?;
        }
        Ok(())
    }
}

#[cfg(not(target_arch = "wasm32"))]
fn main() -> anyhow::Result<()> {
    native::main()
}
