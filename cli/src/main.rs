//! Command-line front end for the reimbursement ledger.
//!
//! The ledger lives in a JSON state file; every subcommand loads it,
//! runs one pipeline operation, and writes it back. Invoice documents
//! are written under a local directory standing in for the object
//! store.

use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use tracing::info;

use reimbursement_ledger_core_rs::{
    accept_batch, cancel_booking, create_booking, generate_batch, generate_invoices,
    mark_booking_used, mark_invoice_paid, next_batch_label, price_ready_events, reject_cashflow,
    BankAccountStatus, BatchExportNotifier, BookingId, CancellationReason, CashflowId, Deposit,
    InvoiceId, InvoiceStorage, Ledger, LedgerState, NotifyError, OfferCategory, StockId,
    StorageError, UserId,
};

#[derive(Parser)]
#[command(name = "reimbursement-ledger")]
#[command(about = "Price bookings, batch cashflows and issue invoices")]
struct Cli {
    /// Path of the JSON ledger state file.
    #[arg(long, global = true, default_value = "ledger.json")]
    ledger: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create an empty ledger state file.
    Init(InitArgs),
    /// Load a small demo dataset (one venue, one user, a few offers).
    SeedDemo,
    /// Book an offer for a user.
    Book(BookArgs),
    /// Mark a booking as used, producing a finance event.
    UseBooking(UseBookingArgs),
    /// Cancel a booking.
    CancelBooking(CancelBookingArgs),
    /// Price every ready finance event, oldest first.
    PriceEvents(NowArgs),
    /// Group validated pricings into a labelled cashflow batch.
    GenerateBatch(GenerateBatchArgs),
    /// Mark every pending cashflow of a batch as accepted by the bank.
    AcceptBatch(BatchLabelArgs),
    /// Mark one cashflow as rejected, freeing its pricings.
    RejectCashflow(RejectCashflowArgs),
    /// Issue invoices for the accepted cashflows of a batch.
    GenerateInvoices(GenerateInvoicesArgs),
    /// Mark an invoice as paid out.
    PayInvoice(PayInvoiceArgs),
    /// Print row counts and pipeline totals.
    Status,
}

#[derive(Args)]
struct InitArgs {
    /// Overwrite an existing state file.
    #[arg(long)]
    force: bool,
}

#[derive(Args)]
struct BookArgs {
    #[arg(long)]
    user: u64,
    #[arg(long)]
    stock: u64,
    #[arg(long, default_value_t = 1)]
    quantity: u32,
    /// Booking timestamp, RFC 3339; defaults to the current time.
    #[arg(long, value_parser = parse_utc)]
    at: Option<DateTime<Utc>>,
}

#[derive(Args)]
struct UseBookingArgs {
    #[arg(long)]
    booking: u64,
    #[arg(long, value_parser = parse_utc)]
    at: Option<DateTime<Utc>>,
}

#[derive(Args)]
struct CancelBookingArgs {
    #[arg(long)]
    booking: u64,
    /// One of: beneficiary, offerer, expired, fraud.
    #[arg(long, value_parser = parse_reason)]
    reason: CancellationReason,
    #[arg(long, value_parser = parse_utc)]
    at: Option<DateTime<Utc>>,
}

#[derive(Args)]
struct NowArgs {
    #[arg(long, value_parser = parse_utc)]
    now: Option<DateTime<Utc>>,
}

#[derive(Args)]
struct GenerateBatchArgs {
    /// Batch label, e.g. VIR7; defaults to the next free one.
    #[arg(long)]
    label: Option<String>,
    /// Only pricings valued strictly before this date are included;
    /// defaults to the current time.
    #[arg(long, value_parser = parse_utc)]
    cutoff: Option<DateTime<Utc>>,
}

#[derive(Args)]
struct BatchLabelArgs {
    #[arg(long)]
    label: String,
}

#[derive(Args)]
struct RejectCashflowArgs {
    #[arg(long)]
    cashflow: u64,
}

#[derive(Args)]
struct PayInvoiceArgs {
    #[arg(long)]
    invoice: u64,
}

#[derive(Args)]
struct GenerateInvoicesArgs {
    #[arg(long)]
    label: String,
    /// Directory the rendered documents are written under.
    #[arg(long, default_value = "invoices")]
    documents_dir: PathBuf,
}

fn parse_utc(s: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(s).map(|dt| dt.with_timezone(&Utc))
}

fn parse_reason(s: &str) -> Result<CancellationReason, String> {
    match s {
        "beneficiary" => Ok(CancellationReason::Beneficiary),
        "offerer" => Ok(CancellationReason::Offerer),
        "expired" => Ok(CancellationReason::Expired),
        "fraud" => Ok(CancellationReason::Fraud),
        other => Err(format!(
            "unknown reason '{other}' (expected beneficiary, offerer, expired or fraud)"
        )),
    }
}

/// Object store backed by a local directory. Object ids contain a
/// token path segment, mirrored as a subdirectory.
struct DirectoryStorage {
    root: PathBuf,
}

impl InvoiceStorage for DirectoryStorage {
    fn store(&mut self, object_id: &str, document: &[u8]) -> Result<(), StorageError> {
        let path = self.root.join(object_id);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| StorageError(e.to_string()))?;
        }
        fs::write(&path, document).map_err(|e| StorageError(e.to_string()))?;
        info!(path = %path.display(), "invoice document written");
        Ok(())
    }
}

struct LogNotifier;

impl BatchExportNotifier for LogNotifier {
    fn batch_exported(
        &mut self,
        batch_id: reimbursement_ledger_core_rs::CashflowBatchId,
        label: &str,
    ) -> Result<(), NotifyError> {
        info!(%batch_id, label, "batch export notified");
        Ok(())
    }
}

fn load_ledger(path: &Path) -> Result<Ledger, Box<dyn Error>> {
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("cannot read ledger file {}: {e}", path.display()))?;
    let state: LedgerState = serde_json::from_str(&raw)?;
    Ok(Ledger::from_state(state))
}

fn save_ledger(path: &Path, ledger: &Ledger) -> Result<(), Box<dyn Error>> {
    let raw = serde_json::to_string_pretty(ledger.state())?;
    fs::write(path, raw)?;
    Ok(())
}

fn run(cli: Cli) -> Result<(), Box<dyn Error>> {
    match cli.command {
        Command::Init(args) => {
            if cli.ledger.exists() && !args.force {
                return Err(format!(
                    "{} already exists (use --force to overwrite)",
                    cli.ledger.display()
                )
                .into());
            }
            save_ledger(&cli.ledger, &Ledger::new())?;
            println!("initialized {}", cli.ledger.display());
        }
        Command::SeedDemo => {
            let mut ledger = load_ledger(&cli.ledger)?;
            let now = Utc::now();
            let venue = ledger.add_venue("Demo venue");
            ledger.link_venue_to_pricing_point(venue, venue, now)?;
            let account = ledger.add_bank_account("FR76 demo", BankAccountStatus::Accepted);
            ledger.link_venue_to_bank_account(venue, account)?;
            let user = ledger.add_user(Deposit::new(300_00, Some(100_00), Some(200_00)));
            let ticket =
                ledger.add_stock(venue, 12_00, Some(50), None, false, OfferCategory::General)?;
            let book = ledger.add_stock(venue, 25_00, Some(10), None, false, OfferCategory::Book)?;
            save_ledger(&cli.ledger, &ledger)?;
            println!("seeded venue {venue}, user {user}, stocks {ticket} and {book}");
        }
        Command::Book(args) => {
            let mut ledger = load_ledger(&cli.ledger)?;
            let at = args.at.unwrap_or_else(Utc::now);
            let booking = ledger.atomic(|tx| {
                create_booking(tx, UserId(args.user), StockId(args.stock), args.quantity, at)
            })?;
            save_ledger(&cli.ledger, &ledger)?;
            println!("booking {booking} created");
        }
        Command::UseBooking(args) => {
            let mut ledger = load_ledger(&cli.ledger)?;
            let at = args.at.unwrap_or_else(Utc::now);
            let event =
                ledger.atomic(|tx| mark_booking_used(tx, BookingId(args.booking), at))?;
            save_ledger(&cli.ledger, &ledger)?;
            println!("booking {} used, finance event {event}", args.booking);
        }
        Command::CancelBooking(args) => {
            let mut ledger = load_ledger(&cli.ledger)?;
            let at = args.at.unwrap_or_else(Utc::now);
            ledger.atomic(|tx| cancel_booking(tx, BookingId(args.booking), args.reason, at))?;
            save_ledger(&cli.ledger, &ledger)?;
            println!("booking {} cancelled", args.booking);
        }
        Command::PriceEvents(args) => {
            let mut ledger = load_ledger(&cli.ledger)?;
            let now = args.now.unwrap_or_else(Utc::now);
            let report = price_ready_events(&mut ledger, now);
            save_ledger(&cli.ledger, &ledger)?;
            println!(
                "priced {}, deferred {}, skipped {}, failed {}",
                report.priced.len(),
                report.deferred.len(),
                report.skipped.len(),
                report.failed.len()
            );
            for (event, message) in &report.failed {
                eprintln!("event {event}: {message}");
            }
        }
        Command::GenerateBatch(args) => {
            let mut ledger = load_ledger(&cli.ledger)?;
            let now = Utc::now();
            let cutoff = args.cutoff.unwrap_or(now);
            let label = args
                .label
                .unwrap_or_else(|| next_batch_label(ledger.state()));
            let report = generate_batch(&mut ledger, &label, cutoff, now)?;
            save_ledger(&cli.ledger, &ledger)?;
            println!(
                "batch {} created with {} cashflow(s), {} payee(s) skipped",
                report.label,
                report.cashflow_ids.len(),
                report.skipped_payees.len()
            );
        }
        Command::AcceptBatch(args) => {
            let mut ledger = load_ledger(&cli.ledger)?;
            let batch_id = ledger
                .state()
                .cashflow_batch_by_label(&args.label)
                .map(|batch| batch.id())
                .ok_or_else(|| format!("no batch labelled {}", args.label))?;
            let accepted = accept_batch(&mut ledger, batch_id, Utc::now())?;
            save_ledger(&cli.ledger, &ledger)?;
            println!("{accepted} cashflow(s) accepted in {}", args.label);
        }
        Command::RejectCashflow(args) => {
            let mut ledger = load_ledger(&cli.ledger)?;
            reject_cashflow(&mut ledger, CashflowId(args.cashflow), Utc::now())?;
            save_ledger(&cli.ledger, &ledger)?;
            println!("cashflow {} rejected", args.cashflow);
        }
        Command::GenerateInvoices(args) => {
            let mut ledger = load_ledger(&cli.ledger)?;
            let batch_id = ledger
                .state()
                .cashflow_batch_by_label(&args.label)
                .map(|batch| batch.id())
                .ok_or_else(|| format!("no batch labelled {}", args.label))?;
            let mut storage = DirectoryStorage {
                root: args.documents_dir,
            };
            let mut notifier = LogNotifier;
            let invoices =
                generate_invoices(&mut ledger, batch_id, &mut storage, &mut notifier, Utc::now())?;
            save_ledger(&cli.ledger, &ledger)?;
            for id in &invoices {
                let invoice = ledger
                    .state()
                    .invoice(*id)
                    .ok_or("invoice vanished after commit")?;
                println!("{} {}", invoice.reference(), invoice.amount());
            }
            println!("{} invoice(s) issued for {}", invoices.len(), args.label);
        }
        Command::PayInvoice(args) => {
            let mut ledger = load_ledger(&cli.ledger)?;
            mark_invoice_paid(&mut ledger, InvoiceId(args.invoice))?;
            save_ledger(&cli.ledger, &ledger)?;
            println!("invoice {} paid", args.invoice);
        }
        Command::Status => {
            let ledger = load_ledger(&cli.ledger)?;
            let state = ledger.state();
            println!("bookings:  {}", state.bookings().count());
            println!("events:    {}", state.finance_events().count());
            println!("pricings:  {}", state.pricings().count());
            println!("cashflows: {}", state.cashflows().count());
            println!("invoices:  {}", state.invoices().count());
            let reimbursed: i64 = state.invoices().map(|invoice| invoice.amount()).sum();
            println!("total invoiced: {reimbursed} cents");
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("error: {error}");
            ExitCode::FAILURE
        }
    }
}
