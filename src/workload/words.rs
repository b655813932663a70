//! 随机 prompt 使用的英文词表

pub const WORDS: &[&str] = &[
    "able", "acid", "actor", "adult", "advice", "after", "again", "agent", "air", "album",
    "alley", "amber", "angle", "animal", "answer", "apple", "april", "area", "army", "art",
    "aspect", "autumn", "baby", "badge", "baker", "ball", "band", "bank", "basket", "beach",
    "bean", "bear", "bell", "bench", "bird", "blade", "block", "board", "boat", "bone",
    "book", "bottle", "brain", "branch", "bread", "brick", "bridge", "brush", "cabin", "cable",
    "cake", "camera", "canal", "candle", "canvas", "carbon", "card", "carpet", "castle", "cat",
    "chain", "chair", "chalk", "cheese", "circle", "city", "clock", "cloud", "coast", "coffee",
    "copper", "corner", "cotton", "cousin", "crown", "cup", "dance", "desert", "desk", "dinner",
    "doctor", "door", "dragon", "dream", "drum", "eagle", "earth", "engine", "event", "fabric",
    "farm", "feather", "field", "finger", "fire", "flag", "flower", "forest", "fox", "frame",
    "garden", "ghost", "glass", "glove", "gold", "grape", "grass", "guitar", "hammer", "harbor",
    "heart", "hill", "honey", "horse", "house", "island", "jacket", "jungle", "kettle", "king",
    "kitchen", "ladder", "lake", "lamp", "leaf", "lemon", "letter", "light", "lion", "market",
    "meadow", "metal", "mirror", "moon", "morning", "mountain", "music", "needle", "night", "ocean",
    "orange", "palace", "paper", "pencil", "piano", "planet", "pocket", "pool", "queen", "rabbit",
    "river", "road", "rock", "rope", "saddle", "salt", "school", "shadow", "ship", "silver",
    "sky", "snow", "spoon", "spring", "star", "stone", "storm", "street", "sugar", "summer",
    "table", "thunder", "tiger", "timber", "tower", "train", "tree", "valley", "violin", "wagon",
    "water", "whale", "window", "winter", "wolf", "wood", "yard", "yellow", "zebra", "zone",
];
