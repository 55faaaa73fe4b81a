use super::poll::Budget;

/// Reader configuration applied by `MFRC522::init` plus the wait budgets used
/// by the transceive engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// TModeReg. TAuto=1 so the timer starts when transmission ends.
    pub timer_mode: u8,
    pub timer_prescaler: u8,
    /// TReloadReg, high and low bytes.
    pub timer_reload: u16,
    /// TxASKReg. 0x40 forces 100 % ASK modulation.
    pub tx_ask: u8,
    /// ModeReg. 0x3D presets the CRC coprocessor to 0x6363 (ISO 14443-3 6.2.4).
    pub mode: u8,
    /// RFCfgReg receiver gain.
    pub rx_gain: u8,
    /// Completion wait for `execute`.
    pub command_budget: Budget,
    /// Completion wait for session-preserving transceive.
    pub transceive_budget: Budget,
    /// Completion wait for transceive inside an open crypto session.
    pub encrypted_budget: Budget,
    /// CRC coprocessor wait.
    pub crc_budget: Budget,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            timer_mode: 0x8D,
            timer_prescaler: 0x3E,
            timer_reload: 30,
            tx_ask: 0x40,
            mode: 0x3D,
            rx_gain: 0x7F,
            command_budget: Budget::spin(2000),
            transceive_budget: Budget::new(100_000, 10),
            encrypted_budget: Budget::new(50_000, 5),
            crc_budget: Budget::new(5000, 10),
        }
    }
}

impl Config {
    pub fn with_timer(mut self, mode: u8, prescaler: u8, reload: u16) -> Self {
        self.timer_mode = mode;
        self.timer_prescaler = prescaler;
        self.timer_reload = reload;
        self
    }

    pub fn with_rx_gain(mut self, gain: u8) -> Self {
        self.rx_gain = gain;
        self
    }

    pub fn with_command_budget(mut self, budget: Budget) -> Self {
        self.command_budget = budget;
        self
    }

    pub fn with_transceive_budget(mut self, budget: Budget) -> Self {
        self.transceive_budget = budget;
        self
    }

    pub fn with_encrypted_budget(mut self, budget: Budget) -> Self {
        self.encrypted_budget = budget;
        self
    }

    pub fn with_crc_budget(mut self, budget: Budget) -> Self {
        self.crc_budget = budget;
        self
    }

    /// Small budgets for simulated chips, where no wall-clock time passes.
    pub fn fast() -> Self {
        Self::default()
            .with_transceive_budget(Budget::spin(64))
            .with_encrypted_budget(Budget::spin(32))
            .with_crc_budget(Budget::spin(64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reader_setup() {
        let cfg = Config::default();
        assert_eq!(cfg.timer_mode, 0x8D);
        assert_eq!(cfg.timer_reload, 30);
        assert_eq!(cfg.command_budget, Budget::spin(2000));
        assert!(cfg.encrypted_budget.iterations < cfg.transceive_budget.iterations);
    }

    #[test]
    fn builders_override_fields() {
        let cfg = Config::default()
            .with_rx_gain(0x48)
            .with_timer(0x80, 0xA9, 0x03E8);
        assert_eq!(cfg.rx_gain, 0x48);
        assert_eq!(cfg.timer_prescaler, 0xA9);
        assert_eq!(cfg.timer_reload, 1000);
    }
}
