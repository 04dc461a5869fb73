extern crate clap;
extern crate pbr;

use uld_packer::example_instances::*;
use uld_packer::free_space::*;
use uld_packer::manifests;
use uld_packer::pack_solver::*;
use uld_packer::util::*;
use uld_packer::validator::*;
use uld_packer::visualize::*;

use clap::{Parser, Subcommand, ValueEnum};
use pbr::ProgressBar;
use rand::{thread_rng, Rng};
use serde::Serialize;

pub fn main() {
    Cli::parse().run();
}

#[derive(Parser, Clone)]
#[clap(author = clap::crate_authors!(", "))]
#[clap(version = env!("CARGO_PKG_VERSION"))]
#[clap(about = "Heuristic 3D bin packing of air cargo into Unit Load Devices")]
#[clap(color = clap::ColorChoice::Auto)]
#[clap(propagate_version = true)]
#[clap(subcommand_required = true)]
#[clap(arg_required_else_help = true)]
pub struct Cli {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Clone)]
enum Commands {
    /// pack two manifests into a placement ledger
    Pack {
        /// the ULD manifest file
        #[clap(value_parser)]
        ulds: String,
        /// the parcel manifest file
        #[clap(value_parser)]
        parcels: String,
        /// the penalty charged once per ULD that holds any priority parcel
        #[clap(short = 's', long, default_value_t = 5000)]
        spread_penalty: Cost,
        /// select the free-space representation
        #[clap(short = 't', long, arg_enum, default_value_t = SolverType::Tree)]
        solver_type: SolverType,
        /// how to choose among admissible regions
        #[clap(long, arg_enum, default_value_t = RegionPolicy::FirstFind)]
        region_policy: RegionPolicy,
        /// how to choose the parcel orientation
        #[clap(long, arg_enum, default_value_t = OrientationPolicy::FirstFit)]
        orientation_policy: OrientationPolicy,
        /// how to order candidate ULDs for economy parcels
        #[clap(long, arg_enum, default_value_t = EconomyUldOrder::VolumeUtilization)]
        economy_uld_order: EconomyUldOrder,
        /// write the ledger to this file instead of stdout
        #[clap(short = 'o', long)]
        output: Option<String>,
        /// logging to the default visualizer file at visualize/data/pack-run.json
        #[clap(long, action)]
        enable_visualizer: bool,
    },
    /// benchmark the speed (and also correctness if enabled)
    Benchmark {
        /// the number of ULDs in the fleet
        #[clap(value_parser)]
        uld_num: usize,
        /// the number of parcels in the catalogue
        #[clap(value_parser)]
        parcel_num: usize,
        /// the probability of a parcel being priority
        #[clap(short = 'p', long, default_value_t = 0.25)]
        priority_probability: f64,
        /// the penalty charged once per ULD that holds any priority parcel
        #[clap(short = 's', long, default_value_t = 5000)]
        spread_penalty: Cost,
        /// example instance type
        #[clap(short = 'c', long, arg_enum, default_value_t = ExampleInstanceType::Random)]
        instance_type: ExampleInstanceType,
        /// select the free-space representation
        #[clap(short = 't', long, arg_enum, default_value_t = SolverType::Tree)]
        solver_type: SolverType,
        /// how to choose among admissible regions
        #[clap(long, arg_enum, default_value_t = RegionPolicy::FirstFind)]
        region_policy: RegionPolicy,
        /// how to choose the parcel orientation
        #[clap(long, arg_enum, default_value_t = OrientationPolicy::FirstFit)]
        orientation_policy: OrientationPolicy,
        /// how to order candidate ULDs for economy parcels
        #[clap(long, arg_enum, default_value_t = EconomyUldOrder::VolumeUtilization)]
        economy_uld_order: EconomyUldOrder,
        /// the number of iterations to run
        #[clap(short = 'r', long, default_value_t = 100)]
        total_rounds: usize,
        /// the method to verify the correctness of the packing result
        #[clap(long, arg_enum, default_value_t = Verifier::Ledger)]
        verifier: Verifier,
        /// logging to the default visualizer file at visualize/data/pack-run.json
        #[clap(long, action)]
        enable_visualizer: bool,
        /// print the ledger of every round
        #[clap(long, action)]
        print_ledger: bool,
        /// message on the progress bar
        #[clap(long, default_value_t = format!(""))]
        pb_message: String,
        /// use deterministic seed for debugging purpose
        #[clap(long, action)]
        use_deterministic_seed: bool,
        #[clap(long)]
        benchmark_profiler_output: Option<String>,
    },
    /// built-in tests
    Test {
        #[clap(subcommand)]
        command: TestCommands,
    },
}

#[derive(Subcommand, Clone)]
enum TestCommands {
    /// test the free-rectangle list solver
    List {
        /// print out the command to test
        #[clap(short = 'c', long, action)]
        print_command: bool,
        /// enable visualizer
        #[clap(short = 'v', long, action)]
        enable_visualizer: bool,
    },
    /// test the space-tree solver
    Tree {
        /// print out the command to test
        #[clap(short = 'c', long, action)]
        print_command: bool,
        /// enable visualizer
        #[clap(short = 'v', long, action)]
        enable_visualizer: bool,
    },
}

/// note that these instances are only for example, to test and benchmark the solvers, but not
/// for real load planning; real manifests come in through the `pack` subcommand
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum, Serialize, Debug)]
pub enum ExampleInstanceType {
    /// a random fleet with a random catalogue
    Random,
    /// the fixed six-ULD challenge fleet with a random catalogue
    AirChallenge,
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum, Serialize, Debug)]
pub enum SolverType {
    /// flat free-rectangle list
    List,
    /// space tree with overlap edges
    Tree,
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum, Serialize, Debug)]
pub enum Verifier {
    /// disable verifier
    None,
    /// re-derive all plan invariants from the ledger and cross-check the reported cost
    Ledger,
}

impl Cli {
    pub fn run(self) {
        match self.command {
            Commands::Pack {
                ulds,
                parcels,
                spread_penalty,
                solver_type,
                region_policy,
                orientation_policy,
                economy_uld_order,
                output,
                enable_visualizer,
            } => {
                let initializer = match manifests::read_initializer(&ulds, &parcels, spread_penalty) {
                    Ok(initializer) => initializer,
                    Err(message) => {
                        eprintln!("error: {message}");
                        std::process::exit(2);
                    }
                };
                let config = build_pack_config(region_policy, orientation_policy, economy_uld_order);
                let mut solver = solver_type.build(&initializer, &config);
                let mut visualizer = None;
                if enable_visualizer {
                    let filename = static_visualize_data_filename();
                    print_visualize_link(filename.clone());
                    visualizer = Some(Visualizer::new(Some(visualize_data_folder() + filename.as_str()), &initializer.ulds).unwrap());
                }
                solver.solve_visualizer(visualizer.as_mut());
                let plan = solver.plan_visualizer(visualizer.as_mut());
                let validation = validate_plan(&initializer, &plan.placements);
                for violation in validation.violations.iter() {
                    eprintln!("violation: {violation}");
                }
                match output {
                    Some(path) => {
                        let mut file = std::fs::File::create(&path)
                            .unwrap_or_else(|err| panic!("cannot create {}: {}", path, err));
                        manifests::write_pack_plan(&mut file, &initializer, &plan).unwrap();
                    }
                    None => print!("{}", manifests::pack_plan_to_string(&initializer, &plan)),
                }
                if !plan.priority_complete {
                    eprintln!("error: priority parcels left behind, the plan is invalid");
                    std::process::exit(1);
                }
                if !validation.is_valid() {
                    std::process::exit(1);
                }
            }
            Commands::Benchmark {
                uld_num,
                parcel_num,
                priority_probability,
                spread_penalty,
                instance_type,
                solver_type,
                region_policy,
                orientation_policy,
                economy_uld_order,
                total_rounds,
                verifier,
                enable_visualizer,
                print_ledger,
                pb_message,
                use_deterministic_seed,
                benchmark_profiler_output,
            } => {
                let config = build_pack_config(region_policy, orientation_policy, economy_uld_order);
                let mut result_verifier = verifier.build();
                let mut benchmark_profiler = BenchmarkProfiler::new(benchmark_profiler_output);
                if enable_visualizer {
                    // print visualizer file path only once
                    print_visualize_link(static_visualize_data_filename());
                }
                // prepare progress bar display
                let mut pb = ProgressBar::on(std::io::stderr(), total_rounds as u64);
                pb.message(format!("{pb_message} ").as_str());
                let mut rng = thread_rng();
                for round in 0..(total_rounds as u64) {
                    pb.set(round);
                    let seed = if use_deterministic_seed { round } else { rng.gen() };
                    let initializer =
                        instance_type.build(uld_num, parcel_num, priority_probability, spread_penalty, seed);
                    let mut solver = solver_type.build(&initializer, &config);
                    // create a new visualizer each round
                    let mut visualizer = None;
                    if enable_visualizer {
                        let new_visualizer = Visualizer::new(
                            Some(visualize_data_folder() + static_visualize_data_filename().as_str()),
                            &initializer.ulds,
                        )
                        .unwrap();
                        visualizer = Some(new_visualizer);
                    }
                    benchmark_profiler.begin(&initializer);
                    solver.solve_visualizer(visualizer.as_mut());
                    benchmark_profiler.end(Some(solver.as_ref()));
                    if print_ledger {
                        let plan = solver.plan();
                        print!("{}", manifests::pack_plan_to_string(&initializer, &plan));
                    }
                    if pb_message.is_empty() {
                        pb.message(format!("{} ", benchmark_profiler.brief()).as_str());
                    }
                    result_verifier.verify(&mut solver, &initializer);
                }
                pb.finish();
                println!();
            }
            Commands::Test { command } => match command {
                TestCommands::List {
                    print_command,
                    enable_visualizer,
                } => {
                    run_test_suite("list", print_command, enable_visualizer);
                }
                TestCommands::Tree {
                    print_command,
                    enable_visualizer,
                } => {
                    run_test_suite("tree", print_command, enable_visualizer);
                }
            },
        }
    }
}

fn run_test_suite(solver_type: &str, print_command: bool, enable_visualizer: bool) {
    let mut parameters = vec![];
    for parcel_num in [50, 150, 300] {
        for uld_num in [2, 4, 6] {
            parameters.push(vec![
                format!("{uld_num}"),
                format!("{parcel_num}"),
                format!("--pb-message"),
                format!("random {uld_num} {parcel_num}"),
            ]);
        }
    }
    for region_policy in [
        "first-find",
        "origin-bias",
        "min-length-sum",
        "min-surface-area",
        "max-surface-area",
        "min-volume",
        "max-volume",
        "least-diff-sides",
        "combined",
    ] {
        parameters.push(vec![
            format!("4"),
            format!("150"),
            format!("--region-policy"),
            format!("{region_policy}"),
            format!("--pb-message"),
            format!("region policy {region_policy}"),
        ]);
    }
    for orientation_policy in ["no-rotate", "first-fit", "min-region-volume"] {
        parameters.push(vec![
            format!("4"),
            format!("150"),
            format!("--orientation-policy"),
            format!("{orientation_policy}"),
            format!("--pb-message"),
            format!("orientation policy {orientation_policy}"),
        ]);
    }
    for economy_uld_order in ["volume-utilization", "remaining-weight"] {
        parameters.push(vec![
            format!("4"),
            format!("150"),
            format!("--economy-uld-order"),
            format!("{economy_uld_order}"),
            format!("--pb-message"),
            format!("economy order {economy_uld_order}"),
        ]);
    }
    parameters.push(vec![
        format!("6"),
        format!("200"),
        format!("--instance-type"),
        format!("air-challenge"),
        format!("--pb-message"),
        format!("air challenge"),
    ]);
    let command_head = vec![format!(""), format!("benchmark")];
    let mut command_tail = vec![
        format!("--solver-type"),
        format!("{solver_type}"),
        format!("--verifier"),
        format!("ledger"),
        format!("--use-deterministic-seed"),
        format!("-r"),
        format!("20"),
    ];
    if enable_visualizer {
        command_tail.append(&mut vec![format!("--enable-visualizer")]);
    }
    for parameter in parameters.iter() {
        execute_in_cli(command_head.iter().chain(parameter.iter()).chain(command_tail.iter()), print_command);
    }
}

pub fn execute_in_cli<'a>(args: impl Iterator<Item = &'a String> + Clone, print_command: bool) {
    if print_command {
        let rendered: Vec<String> = args
            .clone()
            .skip(1) // the empty program-name slot
            .map(|word| {
                if word.contains(char::is_whitespace) {
                    format!("{word:?}")
                } else {
                    word.clone()
                }
            })
            .collect();
        println!("[run] uld_packer {}", rendered.join(" "));
    }
    Cli::parse_from(args).run();
}

fn build_pack_config(
    region_policy: RegionPolicy,
    orientation_policy: OrientationPolicy,
    economy_uld_order: EconomyUldOrder,
) -> PackConfig {
    let fit = FitConfig {
        region_policy,
        orientation_policy,
    };
    PackConfig {
        priority_fit: fit,
        economy_fit: fit,
        economy_uld_order,
    }
}

impl ExampleInstanceType {
    fn build(
        &self,
        uld_num: usize,
        parcel_num: usize,
        priority_probability: f64,
        spread_penalty: Cost,
        seed: u64,
    ) -> PackInitializer {
        match self {
            Self::Random => {
                let mut instance = RandomInstance::new(uld_num, parcel_num, seed);
                instance.priority_probability = priority_probability;
                instance.spread_penalty = spread_penalty;
                instance.get_initializer()
            }
            Self::AirChallenge => {
                assert_eq!(uld_num, 6, "the air challenge fleet has exactly 6 ULDs");
                let mut instance = AirChallengeFleet::new(parcel_num, seed);
                instance.priority_probability = priority_probability;
                instance.spread_penalty = spread_penalty;
                instance.get_initializer()
            }
        }
    }
}

impl SolverType {
    fn build(&self, initializer: &PackInitializer, config: &PackConfig) -> Box<dyn PackSolver> {
        match self {
            Self::List => Box::new(SolverList::new_config(initializer, config)),
            Self::Tree => Box::new(SolverTree::new_config(initializer, config)),
        }
    }
}

impl Verifier {
    fn build(&self) -> Box<dyn ResultVerifier> {
        match self {
            Self::None => Box::new(VerifierNone {}),
            Self::Ledger => Box::new(VerifierLedger {}),
        }
    }
}

trait ResultVerifier {
    fn verify(&mut self, solver: &mut Box<dyn PackSolver>, initializer: &PackInitializer);
}

struct VerifierNone {}

impl ResultVerifier for VerifierNone {
    fn verify(&mut self, _solver: &mut Box<dyn PackSolver>, _initializer: &PackInitializer) {}
}

struct VerifierLedger {}

impl ResultVerifier for VerifierLedger {
    #[allow(clippy::unnecessary_cast)]
    fn verify(&mut self, solver: &mut Box<dyn PackSolver>, initializer: &PackInitializer) {
        let plan = solver.plan();
        let validation = validate_plan(initializer, &plan.placements);
        assert!(validation.is_valid(), "ledger violations: {:?}", validation.violations);
        // re-derive the cost from the ledger alone and cross-check the solver's bookkeeping
        let delay_cost: Cost = plan
            .placements
            .iter()
            .enumerate()
            .filter(|(_, placement)| placement.is_none())
            .map(|(parcel_index, _)| &initializer.parcels[parcel_index])
            .filter(|parcel| !parcel.priority)
            .map(|parcel| parcel.delay_cost)
            .sum();
        let mut priority_ulds = std::collections::BTreeSet::new();
        for (parcel_index, placement) in plan.placements.iter().enumerate() {
            if let Some(placement) = placement {
                if initializer.parcels[parcel_index].priority {
                    priority_ulds.insert(placement.uld_index);
                }
            }
        }
        assert_eq!(plan.priority_uld_num, priority_ulds.len(), "unexpected priority ULD count");
        let expected_cost = delay_cost + initializer.spread_penalty * priority_ulds.len() as Cost;
        assert_eq!(plan.total_cost, expected_cost, "unexpected total cost");
        assert_eq!(plan.total_cost, solver.total_cost(), "plan and solver disagree on cost");
    }
}
