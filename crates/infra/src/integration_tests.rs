//! Integration tests for the full lending pipeline.
//!
//! Service → dispatcher (account lock) → aggregate → settlement → store → bus
//!
//! Verifies:
//! - every operation moves exactly the assets it records
//! - failed operations leave no partial state behind
//! - concurrent operations on one account are linearized

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::{Arc, Barrier, Mutex, mpsc};
    use std::thread;
    use std::time::Duration;

    use ledgerbank_core::{Address, Amount, Asset, DomainError, ExchangeRate, TimeUnit};
    use ledgerbank_events::EventBus;

    use crate::command_dispatcher::DispatchError;
    use crate::config::LedgerConfig;
    use crate::event_store::EventStore;
    use crate::gateway::{Operation, OperationGateway, OperationOutcome};
    use crate::rates::{Clock, FixedRateProvider, ManualClock, ProviderError};
    use crate::service::InMemoryLendingService;
    use crate::settlement::InMemoryBalances;

    const ETH: u128 = 1_000_000_000_000_000_000;

    struct Ledger {
        service: Arc<InMemoryLendingService>,
        balances: Arc<InMemoryBalances>,
        clock: Arc<ManualClock>,
        rates: Arc<FixedRateProvider>,
    }

    fn ledger_with(config: LedgerConfig) -> Ledger {
        ledgerbank_observability::init();

        let balances = Arc::new(InMemoryBalances::new());
        let clock = Arc::new(ManualClock::new(TimeUnit::new(100)));
        let rates = Arc::new(FixedRateProvider::new(ExchangeRate::new(10)));
        let service = InMemoryLendingService::in_memory(
            &config,
            balances.clone(),
            rates.clone(),
            clock.clone(),
        )
        .unwrap();

        Ledger {
            service: Arc::new(service),
            balances,
            clock,
            rates,
        }
    }

    fn ledger() -> Ledger {
        ledger_with(LedgerConfig {
            bank_address: "0xba4c".to_string(),
            ..LedgerConfig::default()
        })
    }

    /// Whole-unit ledger: min deposit 1, so small loans are easy to reason about.
    fn small_unit_ledger() -> Ledger {
        ledger_with(LedgerConfig {
            bank_address: "0xba4c".to_string(),
            min_deposit: Amount::new(1),
            ..LedgerConfig::default()
        })
    }

    /// Clock that stalls inside its first read until released.
    struct PausingClock {
        now: AtomicU64,
        gate: Mutex<Option<(mpsc::Sender<()>, mpsc::Receiver<()>)>>,
    }

    impl PausingClock {
        /// Returns the clock, a receiver signalled when the first read stalls,
        /// and the sender that releases it.
        fn armed(start: u64) -> (Self, mpsc::Receiver<()>, mpsc::Sender<()>) {
            let (reached_tx, reached_rx) = mpsc::channel();
            let (resume_tx, resume_rx) = mpsc::channel();
            let clock = Self {
                now: AtomicU64::new(start),
                gate: Mutex::new(Some((reached_tx, resume_rx))),
            };
            (clock, reached_rx, resume_tx)
        }

        fn set(&self, unit: u64) {
            self.now.store(unit, Ordering::SeqCst);
        }
    }

    impl Clock for PausingClock {
        fn current_time_unit(&self) -> Result<TimeUnit, ProviderError> {
            let now = TimeUnit::new(self.now.load(Ordering::SeqCst));
            let gate = self.gate.lock().unwrap().take();
            if let Some((reached, resume)) = gate {
                reached.send(()).unwrap();
                resume.recv().unwrap();
            }
            Ok(now)
        }
    }

    fn addr(raw: &str) -> Address {
        Address::parse(raw).unwrap()
    }

    fn domain(err: DispatchError) -> DomainError {
        err.domain().cloned().unwrap_or_else(|| panic!("expected a domain error, got {err:?}"))
    }

    #[test]
    fn deposit_then_withdraw_pays_principal_and_interest() {
        let l = ledger();
        let alice = addr("0xa11ce");
        l.balances.fund(&alice, Asset::Base, Amount::new(2 * ETH)).unwrap();

        l.service.deposit(&alice, Amount::new(2 * ETH)).unwrap();
        assert_eq!(l.balances.balance_of(&alice, Asset::Base), Amount::ZERO);

        l.clock.advance_to(TimeUnit::new(103));
        let withdrawal = l.service.withdraw(&alice).unwrap();

        // 12 s * 4 units * 3_170_979_198 per second per ETH * 2 ETH
        assert_eq!(withdrawal.principal, Amount::new(2 * ETH));
        assert_eq!(withdrawal.interest, Amount::new(304_414_003_008));
        assert_eq!(l.balances.balance_of(&alice, Asset::Base), Amount::new(2 * ETH));
        assert_eq!(
            l.balances.balance_of(&alice, Asset::Secondary),
            Amount::new(304_414_003_008)
        );
        assert_eq!(l.service.get_deposit(&alice).unwrap(), None);
    }

    #[test]
    fn same_unit_withdrawal_earns_exactly_one_unit() {
        let l = ledger();
        let alice = addr("0xa11ce");
        l.balances.fund(&alice, Asset::Base, Amount::new(ETH)).unwrap();

        l.service.deposit(&alice, Amount::new(ETH)).unwrap();
        let withdrawal = l.service.withdraw(&alice).unwrap();

        assert_eq!(
            withdrawal.interest,
            l.service.preview_interest_per_time_unit(Amount::new(ETH)).unwrap()
        );
    }

    #[test]
    fn allowance_of_74_rejects_and_75_accepts_a_loan_of_5() {
        let l = small_unit_ledger();
        let alice = addr("0xa11ce");
        let bank = l.service.bank_address().clone();
        l.balances.fund(&alice, Asset::Secondary, Amount::new(1_000)).unwrap();

        l.service.approve(&alice, &bank, Amount::new(74)).unwrap();
        let err = domain(l.service.borrow(&alice, Amount::new(5)).unwrap_err());
        assert_eq!(
            err,
            DomainError::InsufficientAllowance {
                required: Amount::new(75),
                available: Amount::new(74),
            }
        );
        assert_eq!(l.service.get_loan(&alice).unwrap(), None);
        assert_eq!(l.service.get_allowance(&alice, &bank).unwrap(), Amount::new(74));
        assert_eq!(l.balances.balance_of(&alice, Asset::Secondary), Amount::new(1_000));

        l.service.approve(&alice, &bank, Amount::new(75)).unwrap();
        let receipt = l.service.borrow(&alice, Amount::new(5)).unwrap();
        assert_eq!(receipt.collateral, Amount::new(75));
        assert_eq!(l.service.get_allowance(&alice, &bank).unwrap(), Amount::ZERO);
        assert_eq!(l.balances.balance_of(&alice, Asset::Secondary), Amount::new(925));
    }

    #[test]
    fn loan_is_repaid_only_with_the_exact_principal() {
        let l = small_unit_ledger();
        let alice = addr("0xa11ce");
        let bank = l.service.bank_address().clone();
        l.balances.fund(&alice, Asset::Secondary, Amount::new(15_000)).unwrap();
        l.service.approve(&alice, &bank, Amount::new(15_000)).unwrap();

        let receipt = l.service.borrow(&alice, Amount::new(1_000)).unwrap();
        assert_eq!(receipt.fee, Amount::new(10));
        assert_eq!(receipt.disbursed, Amount::new(990));
        assert_eq!(l.balances.balance_of(&alice, Asset::Base), Amount::new(990));
        assert_eq!(l.balances.balance_of(&alice, Asset::Secondary), Amount::ZERO);

        // The fee is owed back: top up the missing 10 before repaying.
        l.balances.fund(&alice, Asset::Base, Amount::new(10)).unwrap();
        for wrong in [999, 1_001] {
            assert_eq!(
                domain(l.service.pay_loan(&alice, Amount::new(wrong)).unwrap_err()),
                DomainError::RepaymentMismatch {
                    owed: Amount::new(1_000),
                    paid: Amount::new(wrong),
                }
            );
        }

        let repayment = l.service.pay_loan(&alice, Amount::new(1_000)).unwrap();
        assert_eq!(repayment.collateral_released, Amount::new(15_000));
        assert_eq!(l.balances.balance_of(&alice, Asset::Base), Amount::ZERO);
        assert_eq!(l.balances.balance_of(&alice, Asset::Secondary), Amount::new(15_000));
        assert_eq!(l.service.get_loan(&alice).unwrap(), None);
        assert_eq!(
            domain(l.service.pay_loan(&alice, Amount::new(1_000)).unwrap_err()),
            DomainError::NoActiveLoan
        );
    }

    #[test]
    fn short_balances_leave_no_partial_state() {
        let l = small_unit_ledger();
        let alice = addr("0xa11ce");
        let bank = l.service.bank_address().clone();

        // Deposit without base funds.
        assert!(matches!(
            domain(l.service.deposit(&alice, Amount::new(5)).unwrap_err()),
            DomainError::InsufficientFunds { asset: Asset::Base, .. }
        ));
        assert_eq!(l.service.get_deposit(&alice).unwrap(), None);

        // Borrow with enough allowance but too little collateral on hand.
        l.service.approve(&alice, &bank, Amount::new(75)).unwrap();
        l.balances.fund(&alice, Asset::Secondary, Amount::new(74)).unwrap();
        assert!(matches!(
            domain(l.service.borrow(&alice, Amount::new(5)).unwrap_err()),
            DomainError::InsufficientFunds { asset: Asset::Secondary, .. }
        ));
        assert_eq!(l.service.get_loan(&alice).unwrap(), None);
        assert_eq!(l.service.get_allowance(&alice, &bank).unwrap(), Amount::new(75));
        assert_eq!(l.balances.balance_of(&alice, Asset::Secondary), Amount::new(74));
        assert_eq!(l.balances.balance_of(&alice, Asset::Base), Amount::ZERO);

        // Only the approval made it into the stream.
        let stream = l.service.dispatcher().store().load_stream(&alice).unwrap();
        assert_eq!(stream.len(), 1);
        assert_eq!(stream[0].event_type, "lending.account.allowance_approved");
    }

    #[test]
    fn concurrent_deposits_on_one_account_admit_exactly_one() {
        let l = small_unit_ledger();
        let alice = addr("0xa11ce");
        l.balances.fund(&alice, Asset::Base, Amount::new(8_000)).unwrap();

        let threads = 8;
        let barrier = Arc::new(Barrier::new(threads));
        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let (service, barrier, alice) = (l.service.clone(), barrier.clone(), alice.clone());
                thread::spawn(move || {
                    barrier.wait();
                    service.deposit(&alice, Amount::new(1_000))
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let ok = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(ok, 1);
        for err in results.into_iter().filter_map(Result::err) {
            assert_eq!(domain(err), DomainError::DepositAlreadyActive);
        }
        assert_eq!(l.balances.balance_of(&alice, Asset::Base), Amount::new(7_000));
    }

    #[test]
    fn concurrent_borrows_on_one_account_admit_exactly_one() {
        let l = small_unit_ledger();
        let alice = addr("0xa11ce");
        let bank = l.service.bank_address().clone();
        l.balances.fund(&alice, Asset::Secondary, Amount::new(10_000)).unwrap();
        l.service.approve(&alice, &bank, Amount::new(10_000)).unwrap();

        let threads = 8;
        let barrier = Arc::new(Barrier::new(threads));
        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let (service, barrier, alice) = (l.service.clone(), barrier.clone(), alice.clone());
                thread::spawn(move || {
                    barrier.wait();
                    service.borrow(&alice, Amount::new(5))
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        for err in results.into_iter().filter_map(Result::err) {
            assert_eq!(domain(err), DomainError::LoanAlreadyActive);
        }
        assert_eq!(l.service.get_allowance(&alice, &bank).unwrap(), Amount::new(9_925));
        assert_eq!(l.balances.balance_of(&alice, Asset::Secondary), Amount::new(9_925));
    }

    #[test]
    fn concurrent_withdrawals_pay_out_exactly_once() {
        let l = ledger();
        let alice = addr("0xa11ce");
        l.balances.fund(&alice, Asset::Base, Amount::new(ETH)).unwrap();
        l.service.deposit(&alice, Amount::new(ETH)).unwrap();
        l.clock.advance_to(TimeUnit::new(103));

        let threads = 8;
        let barrier = Arc::new(Barrier::new(threads));
        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let (service, barrier, alice) = (l.service.clone(), barrier.clone(), alice.clone());
                thread::spawn(move || {
                    barrier.wait();
                    service.withdraw(&alice)
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let paid: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok().copied()).collect();
        assert_eq!(paid.len(), 1);
        for err in results.into_iter().filter_map(Result::err) {
            assert_eq!(domain(err), DomainError::NoActiveDeposit);
        }

        // 4 units at 38_051_750_376 per ETH
        assert_eq!(paid[0].interest, Amount::new(152_207_001_504));
        assert_eq!(l.balances.balance_of(&alice, Asset::Base), Amount::new(ETH));
        assert_eq!(l.balances.balance_of(&alice, Asset::Secondary), paid[0].interest);
        assert_eq!(l.service.dispatcher().store().load_stream(&alice).unwrap().len(), 2);
    }

    #[test]
    fn concurrent_repayments_release_collateral_exactly_once() {
        let l = small_unit_ledger();
        let alice = addr("0xa11ce");
        let bank = l.service.bank_address().clone();
        l.balances.fund(&alice, Asset::Secondary, Amount::new(75)).unwrap();
        l.service.approve(&alice, &bank, Amount::new(75)).unwrap();
        let receipt = l.service.borrow(&alice, Amount::new(5)).unwrap();
        assert_eq!(receipt.disbursed, Amount::new(5));

        // Enough base for every thread to pay if they were not serialized.
        l.balances.fund(&alice, Asset::Base, Amount::new(35)).unwrap();

        let threads = 8;
        let barrier = Arc::new(Barrier::new(threads));
        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let (service, barrier, alice) = (l.service.clone(), barrier.clone(), alice.clone());
                thread::spawn(move || {
                    barrier.wait();
                    service.pay_loan(&alice, Amount::new(5))
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        for err in results.into_iter().filter_map(Result::err) {
            assert_eq!(domain(err), DomainError::NoActiveLoan);
        }
        assert_eq!(l.balances.balance_of(&alice, Asset::Base), Amount::new(35));
        assert_eq!(l.balances.balance_of(&alice, Asset::Secondary), Amount::new(75));
        assert_eq!(l.service.get_loan(&alice).unwrap(), None);
    }

    #[test]
    fn queued_operations_record_the_time_they_were_linearized_at() {
        ledgerbank_observability::init();

        let (clock, stalled, release) = PausingClock::armed(100);
        let clock = Arc::new(clock);
        let balances = Arc::new(InMemoryBalances::new());
        let config = LedgerConfig {
            bank_address: "0xba4c".to_string(),
            ..LedgerConfig::default()
        };
        let service = Arc::new(
            InMemoryLendingService::in_memory(
                &config,
                balances.clone(),
                Arc::new(FixedRateProvider::new(ExchangeRate::new(10))),
                clock.clone(),
            )
            .unwrap(),
        );
        let alice = addr("0xa11ce");
        let bank = service.bank_address().clone();
        balances.fund(&alice, Asset::Base, Amount::new(ETH)).unwrap();

        // The deposit reads t=100 and stalls while holding the account.
        let depositing = {
            let (service, alice) = (service.clone(), alice.clone());
            thread::spawn(move || service.deposit(&alice, Amount::new(ETH)))
        };
        stalled.recv().unwrap();
        clock.set(105);

        // The approval reads t=105 and must queue behind the deposit.
        let approving = {
            let (service, alice) = (service.clone(), alice.clone());
            thread::spawn(move || service.approve(&alice, &bank, Amount::new(75)))
        };
        thread::sleep(Duration::from_millis(50));
        release.send(()).unwrap();

        let deposit = depositing.join().unwrap().unwrap();
        approving.join().unwrap().unwrap();
        assert_eq!(deposit.start_time, TimeUnit::new(100));

        let stream = service.dispatcher().store().load_stream(&alice).unwrap();
        let kinds: Vec<_> = stream.iter().map(|e| e.event_type.as_str()).collect();
        assert_eq!(
            kinds,
            ["lending.account.deposit_opened", "lending.account.allowance_approved"]
        );
        assert_eq!(stream[0].occurred_at, TimeUnit::new(100));
        assert_eq!(stream[1].occurred_at, TimeUnit::new(105));

        // 6 units: 100 through 105 inclusive
        assert_eq!(
            service.accrued_interest(&alice).unwrap(),
            Amount::new(228_310_502_256)
        );
    }

    #[test]
    fn distinct_accounts_proceed_independently() {
        let l = small_unit_ledger();
        let accounts: Vec<Address> = (0..8).map(|i| addr(&format!("0xacc{i}"))).collect();
        for a in &accounts {
            l.balances.fund(a, Asset::Base, Amount::new(100)).unwrap();
        }

        let barrier = Arc::new(Barrier::new(accounts.len()));
        let handles: Vec<_> = accounts
            .iter()
            .cloned()
            .map(|a| {
                let (service, barrier) = (l.service.clone(), barrier.clone());
                thread::spawn(move || {
                    barrier.wait();
                    service.deposit(&a, Amount::new(100))
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap().unwrap();
        }
        for a in &accounts {
            assert_eq!(l.balances.balance_of(a, Asset::Base), Amount::ZERO);
            assert!(l.service.get_deposit(a).unwrap().is_some());
        }
    }

    #[test]
    fn bus_subscribers_observe_committed_events_in_stream_order() {
        let l = small_unit_ledger();
        let alice = addr("0xa11ce");
        let bank = l.service.bank_address().clone();

        // Event-type counter fed from the bus, like a read model would be.
        let seen: Arc<Mutex<HashMap<String, Vec<u64>>>> = Arc::new(Mutex::new(HashMap::new()));
        let sub = l.service.dispatcher().bus().subscribe();
        let sink = seen.clone();
        let consumer = thread::spawn(move || {
            while let Ok(env) = sub.recv_timeout(Duration::from_millis(500)) {
                sink.lock()
                    .unwrap()
                    .entry(env.event_type().to_string())
                    .or_default()
                    .push(env.sequence_number());
            }
        });

        l.balances.fund(&alice, Asset::Secondary, Amount::new(75)).unwrap();
        l.service.approve(&alice, &bank, Amount::new(75)).unwrap();
        l.service.borrow(&alice, Amount::new(5)).unwrap();
        consumer.join().unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen["lending.account.allowance_approved"], vec![1]);
        assert_eq!(seen["lending.account.allowance_consumed"], vec![2]);
        assert_eq!(seen["lending.account.loan_opened"], vec![3]);
    }

    #[test]
    fn rate_moves_between_quote_and_borrow_are_honoured() {
        let l = small_unit_ledger();
        let alice = addr("0xa11ce");
        let bank = l.service.bank_address().clone();
        l.balances.fund(&alice, Asset::Secondary, Amount::new(75)).unwrap();

        let quote = l.service.preview_required_collateral(Amount::new(5)).unwrap();
        l.service.approve(&alice, &bank, quote).unwrap();

        l.rates.set_rate(ExchangeRate::new(11));
        assert!(matches!(
            domain(l.service.borrow(&alice, Amount::new(5)).unwrap_err()),
            DomainError::InsufficientAllowance { .. }
        ));
    }

    #[test]
    fn gateway_round_trips_json_operations() {
        let l = small_unit_ledger();
        let alice = addr("0xa11ce");
        l.balances.fund(&alice, Asset::Base, Amount::new(10)).unwrap();

        let op: Operation =
            serde_json::from_str(r#"{ "op": "deposit", "account": "0xa11ce", "amount": "10" }"#)
                .unwrap();
        let outcome = l.service.submit(op).unwrap();
        assert_eq!(
            serde_json::to_value(&outcome).unwrap(),
            serde_json::json!({
                "outcome": "deposited",
                "value": { "amount": "10", "start_time": 100 }
            })
        );

        let outcome = l
            .service
            .submit(Operation::GetAllowance {
                owner: alice.clone(),
                spender: addr("0xba4c"),
            })
            .unwrap();
        assert_eq!(outcome, OperationOutcome::Allowance(Amount::ZERO));

        let err = l
            .service
            .submit(Operation::Deposit {
                account: alice,
                amount: Amount::new(10),
            })
            .unwrap_err();
        assert_eq!(domain(err), DomainError::DepositAlreadyActive);
    }
}
