use std::collections::HashSet;
use std::sync::Arc;
use tessitura_ports::synth::{InstalledBank, PresetInfo, SoundBank};

/// Bank number reserved for percussion kits; never shifted by a bank offset.
pub const DRUM_BANK: u16 = 128;

/// Installed sound banks in priority order: index 0 is consulted first.
#[derive(Debug, Default)]
pub struct SoundBankRegistry {
    banks: Vec<InstalledBank>,
}

#[derive(Debug, PartialEq, Eq)]
pub enum BankRemoval {
    Removed,
    Missing,
    LastBank,
}

impl SoundBankRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn banks(&self) -> &[InstalledBank] {
        &self.banks
    }

    pub fn len(&self) -> usize {
        self.banks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.banks.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.banks.iter().any(|bank| bank.id == id)
    }

    pub fn ids(&self) -> Vec<String> {
        self.banks.iter().map(|bank| bank.id.clone()).collect()
    }

    /// Returns false when `id` is not installed.
    pub fn set_offset(&mut self, id: &str, bank_offset: u8) -> bool {
        match self.banks.iter_mut().find(|bank| bank.id == id) {
            Some(bank) => {
                bank.bank_offset = bank_offset;
                true
            }
            None => false,
        }
    }

    /// New banks take the highest priority.
    pub fn insert(&mut self, id: String, bank_offset: u8, bank: Arc<dyn SoundBank>) {
        self.banks.insert(
            0,
            InstalledBank {
                id,
                bank_offset,
                bank,
            },
        );
    }

    pub fn remove(&mut self, id: &str) -> BankRemoval {
        let Some(index) = self.banks.iter().position(|bank| bank.id == id) else {
            return BankRemoval::Missing;
        };
        if self.banks.len() == 1 {
            return BankRemoval::LastBank;
        }
        self.banks.remove(index);
        BankRemoval::Removed
    }

    /// Listed ids move to the front in the given order; unknown ids are skipped
    /// and unlisted banks keep their relative order behind them.
    pub fn rearrange(&mut self, order: &[String]) {
        let mut rest = std::mem::take(&mut self.banks);
        let mut arranged = Vec::with_capacity(rest.len());
        for id in order {
            if let Some(index) = rest.iter().position(|bank| &bank.id == id) {
                arranged.push(rest.remove(index));
            }
        }
        arranged.append(&mut rest);
        self.banks = arranged;
    }

    /// Effective preset list: bank offsets applied, first bank wins on clashes.
    pub fn presets(&self) -> Vec<PresetInfo> {
        let mut seen = HashSet::new();
        let mut presets = Vec::new();
        for installed in &self.banks {
            for preset in installed.bank.presets() {
                let bank = if preset.bank == DRUM_BANK {
                    preset.bank
                } else {
                    preset.bank.saturating_add(installed.bank_offset as u16)
                };
                if seen.insert((bank, preset.program)) {
                    presets.push(PresetInfo { bank, ..preset });
                }
            }
        }
        presets.sort_by_key(|preset| (preset.bank, preset.program));
        presets
    }
}
