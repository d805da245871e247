//! `mr-predict`: 对一组扫描/标注/临床属性给出病灶良恶性分类.
//!
//! 输出一行 `<标签>\t<恶性概率>`, 标签 0 为良性, 1 为恶性. 失败时打印错误链并以 1 退出.

use std::error::Error;
use std::process::ExitCode;

use clap::Parser;
use mr_berry::pipeline::{Pipeline, Request};

mod cli;
mod config;

fn report(e: &dyn Error) {
    eprintln!("错误: {e}");
    let mut source = e.source();
    while let Some(s) = source {
        eprintln!("  原因: {s}");
        source = s.source();
    }
}

fn run(args: cli::Cli) -> Result<(), Box<dyn Error>> {
    let mut config = config::load_from_env_or_home(args.config.as_deref())?;
    if let Some(root) = &args.artifact_dir {
        config.artifact_root = Some(root.clone());
    }
    if let Some(m) = args.modality {
        config.modality = m.into();
    }
    if args.no_normalize {
        config.normalize = false;
    }
    if args.resample {
        config.resample = true;
    }

    simple_logger::SimpleLogger::new()
        .with_level(config.log_level)
        .init()?;

    let threads = match args.threads {
        0 => config::cpus(),
        n => n,
    };
    rayon::ThreadPoolBuilder::new().num_threads(threads).build_global()?;
    log::debug!("使用 {threads} 个线程");

    let request = Request {
        clinical: args.clinical(),
        image: args.image,
        mask: args.mask,
        model: args.model,
        preview: args.preview,
    };
    let pipeline = Pipeline::new(config)?;
    let outcome = pipeline.run(&request)?;
    println!("{}\t{:.6}", outcome.label, outcome.probability);
    Ok(())
}

fn main() -> ExitCode {
    match run(cli::Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            report(e.as_ref());
            ExitCode::FAILURE
        }
    }
}
