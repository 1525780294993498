bitflags::bitflags! {
    /// Per-observation delivery options. Each flag is independent.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Options: u8 {
        /// Include the value before the change
        const OLD               = 0b0000_0001;
        /// Include the value after the change
        const NEW               = 0b0000_0010;
        /// Deliver one notification with the current value as soon as the observation is added
        const INITIAL           = 0b0000_0100;
        /// Also deliver a notification before each change is applied (`is_prior == true`)
        const PRIOR             = 0b0000_1000;
        /// Leave `Notification::target` empty
        const OMIT_OBJECT       = 0b0001_0000;
        /// Don't hook the observer or target destruction. The caller must remove the observation
        /// itself; until then it lingers in the registry.
        const MANUAL_UNREGISTER = 0b0010_0000;
    }
}
