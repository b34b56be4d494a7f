use anyhow::{bail, Context, Result};
use po_allocator::allocation::PartialOrderAllocator;
use po_allocator::config::AllocatorConfig;
use po_allocator::conversion::QuotationConverter;
use po_allocator::logging;
use po_allocator::quotation::{create_procurement_api, ItemId, QuotationId};

const USAGE: &str = "usage: po-allocator <quotation-id> <plan>\n       po-allocator <quotation-id> --full [client-po-number]\n\n<plan> lists item ids per partial order, e.g. 12,13;14,15,16";

#[derive(Debug, PartialEq)]
enum Mode {
    Full { client_po_number: String },
    Partial(Vec<Vec<ItemId>>),
}

fn parse_args(args: &[String]) -> Result<(QuotationId, Mode)> {
    let (id, rest) = match args.split_first() {
        Some(split) => split,
        None => bail!(USAGE),
    };
    let id = id
        .parse::<u64>()
        .map(QuotationId)
        .with_context(|| format!("invalid quotation id {:?}", id))?;

    let mode = match rest {
        [flag, tail @ ..] if flag == "--full" => Mode::Full {
            client_po_number: tail.first().cloned().unwrap_or_default(),
        },
        [plan] => Mode::Partial(parse_plan(plan)?),
        _ => bail!(USAGE),
    };
    Ok((id, mode))
}

fn parse_plan(plan: &str) -> Result<Vec<Vec<ItemId>>> {
    plan.split(';')
        .map(|group| {
            group
                .split(',')
                .map(|id| {
                    id.trim()
                        .parse::<u64>()
                        .map(ItemId)
                        .with_context(|| format!("invalid item id {:?} in plan", id))
                })
                .collect::<Result<Vec<_>>>()
        })
        .collect()
}

async fn run_plan(allocator: &PartialOrderAllocator, plan: &[Vec<ItemId>]) -> Result<()> {
    allocator.set_target_round_count(plan.len()).await?;

    for group in plan {
        for id in group {
            allocator.toggle_item_selection(*id).await?;
        }
        let order = allocator.confirm_round().await?;
        println!(
            "Partial purchase order {} created (#{}, {} items)",
            order.round,
            order.purchase_order,
            order.items.len()
        );
    }

    let rounds = allocator.finish_session().await?;
    println!("{}", serde_json::to_string_pretty(&rounds)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let (quotation_id, mode) = parse_args(&args)?;

    let config = AllocatorConfig::load().context("failed to load configuration")?;
    let api = create_procurement_api(&config)?;
    let converter = QuotationConverter::new(api, config);

    let quotation = converter
        .fetch_quotation(quotation_id)
        .await
        .with_context(|| format!("failed to fetch quotation {}", quotation_id))?;

    match mode {
        Mode::Full { client_po_number } => {
            let record = converter.convert_full(&quotation, &client_po_number).await?;
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
        Mode::Partial(plan) => {
            let allocator = converter.open_partial_session(quotation)?;
            run_plan(&allocator, &plan).await?;
        }
    }

    Ok(())
}
