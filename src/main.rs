use clap::{clap_app, App, ArgMatches};
use color_eyre::eyre::{eyre, Result, WrapErr};
use log::{info, warn};
use simplelog::{ColorChoice, Config, LevelFilter, TermLogger, TerminalMode};
use sts_unfold::{read_memory_json, read_sts_json, write_json, write_maps_csv, BeliefSupportUnfolder,
                 ConditionalFormula, ConditionalUnfolder, MemoryAutomaton, MemoryProductUnfolder};

fn app() -> App<'static, 'static> {
    clap_app!(unfold =>
        (version: "0.1")
        (author: "Thomas Robinson")
        (about: "Unfolds POMDPs and MDPs into models that standard MDP analyses can consume")
        (@arg VERBOSE: -v --verbose [VERBOSITY] default_value("0") "Level of verbosity \
        0 - warnings
        1 - model sizes
        2 - construction debugging
        3 - trace
        ")
        (@subcommand belief =>
            (about: "Belief-support MDP of a POMDP")
            (@arg MODEL: -m --model <FILE> "POMDP as json: transitions, state_labelling with an 'init' label and observations")
            (@arg OUTPUT: -o --output <FILE> "Unfolded MDP json")
            (@arg MAPS: --maps [FILE] "csv with the belief support of every unfolded state")
        )
        (@subcommand memory =>
            (about: "Product of a POMDP with a finite memory")
            (@arg MODEL: -m --model <FILE> "Canonical POMDP as json")
            (@arg MEMORY: --memory [FILE] "Memory automaton as json e.g. {\"initial\": 0, \"transitions\": [[0, 1], [1]]}")
            (@arg FULL: --full [K] "K memory states, each may move to any other")
            (@arg COUNTER: --counter [K] "Counter up to K - 1")
            (@arg RING: --ring [K] "Counter modulo K")
            (@arg MEMORY_LABELS: --("memory-labels") "Label product states with memstate_<m>")
            (@arg OUTPUT: -o --output <FILE> "Unfolded POMDP json")
            (@arg MAPS: --maps [FILE] "csv with the original state and memory state of every product state")
        )
        (@subcommand conditional =>
            (about: "Reduces P(F target | F condition) to reachability in a product MDP")
            (@arg MODEL: -m --model <FILE> "MDP as json")
            (@arg TARGET: -t --target <LABEL> "Target state label")
            (@arg CONDITION: -c --condition <LABEL> "Condition state label")
            (@arg OUTPUT: -o --output <FILE> "Unfolded MDP json")
            (@arg MAPS: --maps [FILE] "csv with the original state and monitor mode of every product state")
        )
    )
}

fn level_filter(verbose: u32) -> LevelFilter {
    match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace
    }
}

fn required<'a>(matches: &'a ArgMatches, name: &str) -> Result<&'a str> {
    matches.value_of(name).ok_or_else(|| eyre!("missing argument {}", name))
}

fn parse_size(matches: &ArgMatches, name: &str) -> Result<Option<usize>> {
    matches.value_of(name)
        .map(|k| k.parse::<usize>().wrap_err_with(|| format!("{} expects a number of memory states, got '{}'", name, k)))
        .transpose()
}

/// Exactly one memory source must be given
fn memory_automaton(matches: &ArgMatches) -> Result<MemoryAutomaton> {
    let sources = ["MEMORY", "FULL", "COUNTER", "RING"].iter().filter(|s| matches.is_present(*s)).count();
    if sources != 1 {
        return Err(eyre!("give exactly one of --memory, --full, --counter, --ring"));
    }
    if let Some(path) = matches.value_of("MEMORY") {
        return read_memory_json(path).wrap_err_with(|| format!("reading memory automaton {}", path));
    }
    let memory = match (parse_size(matches, "FULL")?, parse_size(matches, "COUNTER")?, parse_size(matches, "RING")?) {
        (Some(k), _, _) => MemoryAutomaton::full(k),
        (_, Some(k), _) => MemoryAutomaton::fixed_counter(k),
        (_, _, Some(k)) => MemoryAutomaton::fixed_ring(k),
        _ => return Err(eyre!("no memory automaton given"))
    };
    memory.validate()?;
    Ok(memory)
}

fn belief(matches: &ArgMatches) -> Result<()> {
    let model_path = required(matches, "MODEL")?;
    let pomdp = read_sts_json(model_path).wrap_err_with(|| format!("reading model {}", model_path))?;
    let mut unfolder = BeliefSupportUnfolder::new(&pomdp)?;
    let mdp = unfolder.unfold_belief_support_mdp()?;
    write_json(required(matches, "OUTPUT")?, mdp)?;
    println!("belief-support MDP: {} states, {} choices", mdp.num_states(), mdp.num_choices());

    if let Some(path) = matches.value_of("MAPS") {
        let supports: Vec<String> = unfolder.belief_supports.iter()
            .map(|support| support.iter().map(|s| s.to_string()).collect::<Vec<_>>().join(" "))
            .collect();
        write_maps_csv(path, &["support"], &[supports])?;
        info!("belief supports written to {}", path);
    }
    Ok(())
}

fn memory(matches: &ArgMatches) -> Result<()> {
    let model_path = required(matches, "MODEL")?;
    let pomdp = read_sts_json(model_path).wrap_err_with(|| format!("reading model {}", model_path))?;
    let memory = memory_automaton(matches)?;
    let mut unfolder = MemoryProductUnfolder::new(&pomdp, &memory, matches.is_present("MEMORY_LABELS"));
    let product = unfolder.transform()?;
    write_json(required(matches, "OUTPUT")?, &product)?;
    println!("memory product: {} states, {} choices", product.num_states(), product.num_choices());

    if let Some(path) = matches.value_of("MAPS") {
        let states: Vec<String> = unfolder.product_to_state.iter().map(|s| s.to_string()).collect();
        let memories: Vec<String> = unfolder.product_to_memory.iter().map(|m| m.to_string()).collect();
        write_maps_csv(path, &["state", "memory"], &[states, memories])?;
        info!("product maps written to {}", path);
    }
    Ok(())
}

fn conditional(matches: &ArgMatches) -> Result<()> {
    let model_path = required(matches, "MODEL")?;
    let mdp = read_sts_json(model_path).wrap_err_with(|| format!("reading model {}", model_path))?;
    let formula = ConditionalFormula::new(required(matches, "TARGET")?, required(matches, "CONDITION")?);
    let mut unfolder = ConditionalUnfolder::new(&mdp, formula);
    let reachable = unfolder.is_condition_reachable()?;
    println!("condition reachable: {}", reachable);
    if !reachable {
        warn!("the condition '{}' cannot be reached, the conditional probability is undefined", unfolder.conditional_label());
        return Ok(());
    }

    let product = unfolder.construct_unfolded_model()?;
    write_json(required(matches, "OUTPUT")?, product)?;
    println!("conditional product: {} states, {} choices", product.num_states(), product.num_choices());

    if let Some(path) = matches.value_of("MAPS") {
        let states: Vec<String> = unfolder.state_prototype.iter().map(|s| s.to_string()).collect();
        let modes: Vec<String> = unfolder.state_memory.iter().map(|m| m.index().to_string()).collect();
        write_maps_csv(path, &["state", "mode"], &[states, modes])?;
        info!("product maps written to {}", path);
    }
    Ok(())
}

fn main() -> Result<()> {
    color_eyre::install()?;
    let matches = app().get_matches();

    let verbose: u32 = required(&matches, "VERBOSE")?.parse().wrap_err("verbosity must be a number")?;
    TermLogger::init(level_filter(verbose), Config::default(), TerminalMode::Mixed, ColorChoice::Auto)?;

    match matches.subcommand() {
        ("belief", Some(f)) => belief(f),
        ("memory", Some(f)) => memory(f),
        ("conditional", Some(f)) => conditional(f),
        (_, _) => Err(eyre!("no subcommand given, see --help"))
    }
}
